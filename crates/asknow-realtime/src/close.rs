//! Why a connection ended, and the close frame it gets.

use std::fmt;

use axum::extract::ws::CloseFrame;

/// Reason a connection was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or hung up.
    PeerClosed,
    /// The server is shutting down.
    GoingAway,
    /// The user id does not resolve to a known user.
    UnknownIdentity,
    /// The identity lookup itself failed.
    IdentityLookupFailed,
    /// A newer connection for the same user replaced this one.
    Superseded,
    /// No liveness signal within the heartbeat timeout.
    HeartbeatTimeout,
    /// Too many consecutive malformed inbound frames.
    MalformedFrames,
    /// A router could not deliver to this connection.
    DeliveryFailed,
    /// The socket write failed or timed out.
    TransportError,
}

impl CloseReason {
    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::PeerClosed => 1000,
            Self::GoingAway => 1001,
            Self::UnknownIdentity => 1008,
            Self::IdentityLookupFailed | Self::TransportError => 1011,
            Self::Superseded => 4000,
            Self::HeartbeatTimeout => 4001,
            Self::MalformedFrames => 4002,
            Self::DeliveryFailed => 4003,
        }
    }

    /// Close frame reason text.
    pub fn message(self) -> &'static str {
        match self {
            Self::PeerClosed => "closed",
            Self::GoingAway => "server shutting down",
            Self::UnknownIdentity => "User not found",
            Self::IdentityLookupFailed => "identity lookup failed",
            Self::Superseded => "superseded by a newer connection",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::MalformedFrames => "too many malformed frames",
            Self::DeliveryFailed => "delivery failed",
            Self::TransportError => "transport error",
        }
    }

    /// Whether a close frame should be written. A peer that closed or a
    /// broken transport gets none.
    pub fn sends_frame(self) -> bool {
        !matches!(self, Self::PeerClosed | Self::TransportError)
    }

    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::GoingAway => "going_away",
            Self::UnknownIdentity => "unknown_identity",
            Self::IdentityLookupFailed => "identity_lookup_failed",
            Self::Superseded => "superseded",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::MalformedFrames => "malformed_frames",
            Self::DeliveryFailed => "delivery_failed",
            Self::TransportError => "transport_error",
        }
    }

    /// The WebSocket close frame for this reason.
    pub fn frame(self) -> CloseFrame {
        CloseFrame {
            code: self.code(),
            reason: self.message().into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}
