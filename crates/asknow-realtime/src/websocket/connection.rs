//! WebSocket client connection state.
//!
//! A [`ClientConnection`] is the handle routers write through. Frames go into
//! a bounded queue drained by the connection's single writer task, so writes
//! to one socket are serialized and a router never waits on a slow peer.
//!
//! While a responder is replaying pending items, the catch-up gate is held:
//! router frames are buffered behind the replay and flushed, in order, when
//! the gate is released.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use asknow_core::{ConnectionId, Role, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::close::CloseReason;
use crate::errors::SendError;

/// A frame queued for the writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// JSON text frame.
    Text(Arc<String>),
    /// Heartbeat ping.
    Ping,
    /// Close frame; the writer stops after sending it.
    Close(CloseReason),
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Owning user.
    pub user_id: UserId,
    /// Role resolved at handshake.
    pub role: Role,
    /// When this connection was established.
    pub connected_at: Instant,
    tx: mpsc::Sender<Outbound>,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
    catch_up: Mutex<Option<VecDeque<Arc<String>>>>,
    close_reason: Mutex<Option<CloseReason>>,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Create a new connection writing into `tx`.
    pub fn new(user_id: UserId, role: Role, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            user_id,
            role,
            connected_at: now,
            tx,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            catch_up: Mutex::new(None),
            close_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Queue a text frame.
    ///
    /// Never waits: a full queue or a closed connection is an immediate
    /// error. While the catch-up gate is held the frame is buffered instead.
    pub fn send(&self, message: Arc<String>) -> Result<(), SendError> {
        if let Some(reason) = self.close_reason() {
            return Err(SendError::Closed(reason));
        }

        {
            let mut gate = self.catch_up.lock();
            if let Some(buffer) = gate.as_mut() {
                if buffer.len() >= self.tx.max_capacity() {
                    let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                    return Err(SendError::QueueFull);
                }
                buffer.push_back(message);
                return Ok(());
            }
        }

        self.tx.try_send(Outbound::Text(message)).map_err(|e| match e {
            TrySendError::Full(_) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendError::QueueFull
            }
            TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    /// Serialize a value and queue it.
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<(), SendError> {
        let json = serde_json::to_string(value)?;
        self.send(Arc::new(json))
    }

    /// Hold the catch-up gate. Call before the connection is registered.
    pub fn hold_for_catch_up(&self) {
        *self.catch_up.lock() = Some(VecDeque::new());
    }

    /// Queue a catch-up frame ahead of anything buffered behind the gate.
    ///
    /// Waits up to `timeout` for queue capacity.
    pub async fn send_catch_up(&self, message: Arc<String>, timeout: Duration) -> Result<(), SendError> {
        if let Some(reason) = self.close_reason() {
            return Err(SendError::Closed(reason));
        }
        self.enqueue(Outbound::Text(message), timeout).await
    }

    /// Flush frames buffered during catch-up, then release the gate.
    ///
    /// Frames arriving during the flush join the tail of the buffer, so
    /// order is preserved. Returns the number of frames flushed.
    pub async fn release_catch_up(&self, timeout: Duration) -> Result<usize, SendError> {
        let mut flushed = 0;
        loop {
            let next = {
                let mut gate = self.catch_up.lock();
                let popped = gate.as_mut().and_then(VecDeque::pop_front);
                match popped {
                    Some(message) => message,
                    None => {
                        *gate = None;
                        return Ok(flushed);
                    }
                }
            };
            self.enqueue(Outbound::Text(next), timeout).await?;
            flushed += 1;
        }
    }

    /// Queue a heartbeat ping. Returns `false` if it could not be queued.
    pub fn ping(&self) -> bool {
        self.tx.try_send(Outbound::Ping).is_ok()
    }

    /// Queue the final close frame, waiting up to `timeout` for capacity.
    ///
    /// Allowed after [`close`](Self::close); the writer exits once it is sent.
    pub async fn enqueue_close(&self, reason: CloseReason, timeout: Duration) -> bool {
        self.enqueue(Outbound::Close(reason), timeout).await.is_ok()
    }

    async fn enqueue(&self, frame: Outbound, timeout: Duration) -> Result<(), SendError> {
        self.tx.send_timeout(frame, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => SendError::Timeout,
            SendTimeoutError::Closed(_) => SendError::Disconnected,
        })
    }

    /// Mark the connection closed. The first reason wins.
    ///
    /// Returns `true` if this call closed it. Further sends fail with
    /// [`SendError::Closed`] and the owning read loop is woken.
    pub fn close(&self, reason: CloseReason) -> bool {
        let first = {
            let mut slot = self.close_reason.lock();
            if slot.is_some() {
                false
            } else {
                *slot = Some(reason);
                true
            }
        };
        self.cancel.cancel();
        first
    }

    /// Mark this handle stale because a newer connection replaced it.
    pub fn supersede(&self) -> bool {
        self.close(CloseReason::Superseded)
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.close_reason.lock().is_some()
    }

    /// The reason recorded by the first [`close`](Self::close).
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Token cancelled when the connection closes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Mark the connection as alive (any inbound frame or pong).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last inbound activity.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Total frames refused because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("close_reason", &self.close_reason())
            .finish_non_exhaustive()
    }
}
