//! Server configuration.

use std::time::Duration;

use asknow_settings::AskNowSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the realtime server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Bearer token required on `/api/notify`, if any.
    pub ingest_token: Option<String>,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Bound on one socket write, in milliseconds.
    pub write_timeout_ms: u64,
    /// Bound on enqueueing one catch-up frame, in milliseconds.
    pub catch_up_timeout_ms: u64,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat timeout in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Consecutive malformed frames tolerated (0 = unlimited).
    pub max_malformed_frames: u32,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl RealtimeConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &AskNowSettings) -> Self {
        let rt = &settings.realtime;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            ingest_token: settings.server.ingest_token.clone(),
            send_queue_capacity: rt.send_queue_capacity,
            write_timeout_ms: rt.write_timeout_ms,
            catch_up_timeout_ms: rt.catch_up_timeout_ms,
            heartbeat_interval_ms: rt.heartbeat_interval_ms,
            heartbeat_timeout_ms: rt.heartbeat_timeout_ms,
            max_malformed_frames: rt.max_malformed_frames,
            max_message_size: rt.max_message_size,
        }
    }

    /// Socket write bound.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Catch-up enqueue bound.
    pub fn catch_up_timeout(&self) -> Duration {
        Duration::from_millis(self.catch_up_timeout_ms)
    }

    /// Heartbeat tick.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat silence limit.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        let mut cfg = Self::from_settings(&AskNowSettings::default());
        cfg.host = "127.0.0.1".into();
        cfg.port = 0;
        cfg
    }
}
