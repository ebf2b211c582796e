//! Fan-out helpers for event sources.
//!
//! Each helper picks the recipients of one kind of question or chat event
//! and routes the caller's payload to them unchanged. A failed delivery is
//! reported, never raised: the mutation that triggered it has already
//! happened.

use asknow_core::{Notification, NotificationType, Role, UserId};
use serde::Serialize;
use serde_json::Value;

use crate::router::{DeliveryResult, NotificationRouter};

/// What a fan-out reached.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutReport {
    /// Per-user unicast outcomes, in send order.
    pub unicast: Vec<(UserId, DeliveryResult)>,
    /// Successful deliveries of the role broadcast, if one was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<usize>,
}

impl FanOutReport {
    /// Total frames queued.
    pub fn delivered(&self) -> usize {
        self.unicast.iter().filter(|(_, r)| r.is_delivered()).count() + self.broadcast.unwrap_or(0)
    }
}

impl NotificationRouter {
    /// A new question: every connected responder gets `NEW_ITEM`.
    pub fn question_created(&self, payload: Value) -> FanOutReport {
        let notification = Notification::new(NotificationType::NewItem, payload);
        FanOutReport {
            unicast: Vec::new(),
            broadcast: Some(self.broadcast(Role::Responder, &notification)),
        }
    }

    /// A responder claimed a question: the owner and every responder get
    /// `ITEM_CLAIMED`, so other responders can drop it from their queue.
    pub fn question_claimed(&self, owner: UserId, payload: Value) -> FanOutReport {
        let notification = Notification::new(NotificationType::ItemClaimed, payload);
        FanOutReport {
            unicast: vec![(owner, self.send_to(owner, &notification))],
            broadcast: Some(self.broadcast(Role::Responder, &notification)),
        }
    }

    /// A question changed: the owner and the assigned responder get
    /// `ITEM_UPDATED`.
    pub fn question_updated(&self, owner: UserId, responder: Option<UserId>, payload: Value) -> FanOutReport {
        let notification = Notification::new(NotificationType::ItemUpdated, payload);
        self.to_parties(owner, responder, &notification)
    }

    /// A question was closed: the owner and the assigned responder get
    /// `ITEM_CLOSED`.
    pub fn question_closed(&self, owner: UserId, responder: Option<UserId>, payload: Value) -> FanOutReport {
        let notification = Notification::new(NotificationType::ItemClosed, payload);
        self.to_parties(owner, responder, &notification)
    }

    /// A chat message: the other party of the question gets `CHAT_MESSAGE`.
    ///
    /// A requester's message goes to the assigned responder (nobody if the
    /// question is unclaimed); a responder's message goes to the owner.
    pub fn chat_message(
        &self,
        sender_role: Role,
        owner: UserId,
        responder: Option<UserId>,
        payload: Value,
    ) -> FanOutReport {
        let recipient = match sender_role {
            Role::Requester => responder,
            Role::Responder => Some(owner),
        };
        let notification = Notification::new(NotificationType::ChatMessage, payload);
        FanOutReport {
            unicast: recipient
                .map(|user| (user, self.send_to(user, &notification)))
                .into_iter()
                .collect(),
            broadcast: None,
        }
    }

    fn to_parties(&self, owner: UserId, responder: Option<UserId>, notification: &Notification) -> FanOutReport {
        let mut unicast = vec![(owner, self.send_to(owner, notification))];
        if let Some(responder) = responder.filter(|r| *r != owner) {
            unicast.push((responder, self.send_to(responder, notification)));
        }
        FanOutReport {
            unicast,
            broadcast: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
