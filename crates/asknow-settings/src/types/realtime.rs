//! Connection and fan-out tuning.

use serde::{Deserialize, Serialize};

/// Realtime connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Per-connection outbound queue depth. A full queue fails the delivery.
    pub send_queue_capacity: usize,
    /// Upper bound on a single socket write before the connection is dropped.
    pub write_timeout_ms: u64,
    /// Upper bound on enqueueing one catch-up frame.
    pub catch_up_timeout_ms: u64,
    /// Interval between server pings.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is considered dead.
    pub heartbeat_timeout_ms: u64,
    /// Consecutive malformed inbound frames tolerated before closing.
    /// 0 means unlimited.
    pub max_malformed_frames: u32,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 64,
            write_timeout_ms: 5_000,
            catch_up_timeout_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_malformed_frames: 0,
            max_message_size: 64 * 1024,
        }
    }
}
