use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackingError;
use crate::models::order::OrderId;

pub const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSender {
    Driver,
    Customer,
}

/// Local bookkeeping for a transcript entry; never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    #[default]
    Received,
    Pending,
    Forwarded,
    /// The connection was down when the message was sent.
    Dropped,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub order_id: OrderId,
    pub text: String,
    pub sender: ChatSender,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl ChatMessage {
    pub fn outgoing(order_id: OrderId, text: &str) -> Result<Self, TrackingError> {
        validate_text(text)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            order_id,
            text: text.to_string(),
            sender: ChatSender::Customer,
            timestamp: Utc::now(),
            delivery: DeliveryState::Pending,
        })
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.id.trim().is_empty() {
            return Err(TrackingError::InvalidMessage("missing id".to_string()));
        }
        validate_text(&self.text)
    }
}

pub fn validate_text(text: &str) -> Result<(), TrackingError> {
    if text.trim().is_empty() {
        return Err(TrackingError::InvalidMessage(
            "text cannot be empty".to_string(),
        ));
    }

    let chars = text.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(TrackingError::InvalidMessage(format!(
            "text is {chars} characters, limit is {MAX_MESSAGE_CHARS}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{ChatMessage, ChatSender, DeliveryState, MAX_MESSAGE_CHARS};
    use crate::models::order::OrderId;

    #[test]
    fn outgoing_message_is_pending_customer_message() {
        let message = ChatMessage::outgoing(OrderId::new("ord-1").unwrap(), "hello").unwrap();
        assert_eq!(message.sender, ChatSender::Customer);
        assert_eq!(message.delivery, DeliveryState::Pending);
        assert!(!message.id.is_empty());
    }

    #[test]
    fn text_length_limits_are_enforced() {
        let order_id = OrderId::new("ord-1").unwrap();
        assert!(ChatMessage::outgoing(order_id.clone(), "  ").is_err());
        assert!(ChatMessage::outgoing(order_id.clone(), &"a".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert!(ChatMessage::outgoing(order_id, &"a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        let order_id = OrderId::new("ord-1").unwrap();
        let text = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(ChatMessage::outgoing(order_id, &text).is_ok());
    }

    #[test]
    fn wire_message_deserializes_as_received() {
        let message: ChatMessage = serde_json::from_value(serde_json::json!({
            "id": "m-1",
            "orderId": "ord-1",
            "text": "I'm outside",
            "sender": "driver",
            "timestamp": "2026-01-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(message.sender, ChatSender::Driver);
        assert_eq!(message.delivery, DeliveryState::Received);
    }
}
