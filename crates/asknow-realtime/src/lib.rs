//! # asknow-realtime
//!
//! Real-time notification fan-out for AskNow.
//!
//! - [`registry::ConnectionRegistry`]: one live connection per user
//! - [`router::NotificationRouter`]: unicast and role broadcast with typed results
//! - [`websocket`]: per-connection state, lifecycle, heartbeat, ack replies
//! - [`events`]: question/chat fan-out helpers for event sources
//! - [`server::RealtimeServer`]: `/ws/{user_id}`, `/api/notify`, `/health`, `/metrics`
//! - Graceful shutdown via [`shutdown::ShutdownCoordinator`]

#![deny(unsafe_code)]

pub mod close;
pub mod config;
pub mod errors;
pub mod events;
pub mod health;
pub mod ingress;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use close::CloseReason;
pub use config::RealtimeConfig;
pub use errors::{SendError, ServerError};
pub use events::FanOutReport;
pub use registry::ConnectionRegistry;
pub use router::{DeliveryResult, NotificationRouter};
pub use server::{AppState, RealtimeServer};
