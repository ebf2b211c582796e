//! # asknow-core
//!
//! Foundation types shared by every AskNow realtime crate.
//!
//! - [`UserId`] / [`ConnectionId`] identity newtypes
//! - [`Role`], the closed set of user roles (student / tutor)
//! - [`Notification`], [`Acknowledgement`], [`InboundFrame`]: the wire frames
//!   exchanged over a realtime connection
//! - [`logging::init_subscriber`] for setting up the `tracing` subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod notification;
pub mod role;

pub use ids::{ConnectionId, UserId};
pub use logging::LogFormat;
pub use notification::{Acknowledgement, InboundFrame, Notification, NotificationType, now_millis};
pub use role::{Role, UnknownRole};
