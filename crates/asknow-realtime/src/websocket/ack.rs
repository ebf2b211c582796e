//! Acknowledgement replies to inbound frames.

use asknow_core::{Acknowledgement, InboundFrame};
use metrics::counter;
use tracing::{debug, warn};

use crate::metrics::ACKS_TOTAL;
use crate::router::DeliveryResult;

use super::connection::ClientConnection;

/// Reply to `frame` on `connection` if it carries a message id.
///
/// Returns `None` when there is nothing to acknowledge. A failed reply is
/// logged and reported but never closes the connection.
pub fn acknowledge(connection: &ClientConnection, frame: &InboundFrame) -> Option<DeliveryResult> {
    let message_id = frame.message_id()?;
    let ack = Acknowledgement::new(message_id);

    let result = match connection.send_json(&ack) {
        Ok(()) => {
            debug!(user_id = %connection.user_id, message_id, "ack sent");
            DeliveryResult::Delivered
        }
        Err(e) => {
            warn!(user_id = %connection.user_id, message_id, error = %e, "failed to send ack");
            DeliveryResult::Failed
        }
    };
    counter!(ACKS_TOTAL, "result" => result.as_str()).increment(1);
    Some(result)
}
