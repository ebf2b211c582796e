//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may be partial; missing fields take their compiled default.

mod realtime;
mod server;

pub use realtime::*;
pub use server::*;

use asknow_core::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AskNowSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Connection and fan-out tuning.
    pub realtime: RealtimeSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Identity and pending-item source.
    pub directory: DirectorySettings,
}

impl AskNowSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rt = &self.realtime;
        if rt.send_queue_capacity == 0 {
            return Err(invalid("realtime.sendQueueCapacity must be greater than 0"));
        }
        if rt.write_timeout_ms == 0 {
            return Err(invalid("realtime.writeTimeoutMs must be greater than 0"));
        }
        if rt.catch_up_timeout_ms == 0 {
            return Err(invalid("realtime.catchUpTimeoutMs must be greater than 0"));
        }
        if rt.heartbeat_interval_ms == 0 {
            return Err(invalid("realtime.heartbeatIntervalMs must be greater than 0"));
        }
        if rt.heartbeat_timeout_ms < rt.heartbeat_interval_ms {
            return Err(invalid(
                "realtime.heartbeatTimeoutMs must be at least realtime.heartbeatIntervalMs",
            ));
        }
        if rt.max_message_size == 0 {
            return Err(invalid("realtime.maxMessageSize must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SettingsError {
    SettingsError::InvalidValue(msg.to_string())
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` takes precedence when set).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Where identities and pending items come from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySettings {
    /// `SQLite` database of the AskNow backend. `None` runs in-memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}
