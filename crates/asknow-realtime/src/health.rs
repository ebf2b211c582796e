//! `/health` endpoint.

use std::time::Instant;

use asknow_core::Role;
use serde::Serialize;

use crate::registry::ConnectionRegistry;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Connected responders (tutors).
    pub responders: usize,
    /// Connected requesters (students).
    pub requesters: usize,
}

/// Build a health response from the live registry.
pub fn health_check(start_time: Instant, registry: &ConnectionRegistry) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: registry.len(),
        responders: registry.count_by_role(Role::Responder),
        requesters: registry.count_by_role(Role::Requester),
    }
}
