//! WebSocket connection state, lifecycle, heartbeat, and acknowledgements.

pub mod ack;
pub mod connection;
pub mod heartbeat;
pub mod lifecycle;
