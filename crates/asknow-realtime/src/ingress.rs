//! `POST /api/notify`: publish endpoint for out-of-process event sources.
//!
//! ```json
//! {"target": {"userId": 7}, "type": "ITEM_UPDATED", "data": {...}}
//! {"target": {"role": "tutor"}, "type": "NEW_ITEM", "data": {...}}
//! ```
//!
//! When an ingest token is configured the request must carry
//! `Authorization: Bearer <token>`.

use asknow_core::{Notification, NotificationType, Role, UserId};
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::router::DeliveryResult;
use crate::server::AppState;

/// Who a published notification goes to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum Target {
    /// One user.
    #[serde(rename_all = "camelCase")]
    User {
        /// Recipient.
        user_id: UserId,
    },
    /// Every connection with a role.
    Role {
        /// Recipient role.
        role: Role,
    },
}

/// Publish request body.
#[derive(Clone, Debug, Deserialize)]
pub struct NotifyRequest {
    /// Recipients.
    pub target: Target,
    /// Notification type.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
}

/// Publish response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NotifyResponse {
    /// Unicast outcome; absent for broadcasts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DeliveryResult>,
    /// Frames queued.
    pub delivered: usize,
}

/// POST /api/notify
pub async fn notify_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NotifyRequest>,
) -> Response {
    if !authorized(state.config.ingest_token.as_deref(), &headers) {
        warn!("publish rejected: bad or missing bearer token");
        return error(StatusCode::UNAUTHORIZED, "invalid ingest token");
    }
    if request.kind == NotificationType::Ack {
        return error(StatusCode::BAD_REQUEST, "ACK is reserved for acknowledgements");
    }

    let notification = Notification::new(request.kind, request.data);
    let response = match request.target {
        Target::User { user_id } => {
            let result = state.notifier.send_to(user_id, &notification);
            NotifyResponse {
                result: Some(result),
                delivered: usize::from(result.is_delivered()),
            }
        }
        Target::Role { role } => NotifyResponse {
            result: None,
            delivered: state.notifier.broadcast(role, &notification),
        },
    };
    debug!(event_type = %request.kind, delivered = response.delivered, "published notification");
    Json(response).into_response()
}

fn authorized(expected: Option<&str>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}
