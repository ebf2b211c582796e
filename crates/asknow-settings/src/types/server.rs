//! HTTP listener settings.

use serde::{Deserialize, Serialize};

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 picks a free port).
    pub port: u16,
    /// Bearer token required by the publish endpoint. `None` leaves it open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            ingest_token: None,
        }
    }
}
