use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TrackingError;
use crate::models::chat::ChatMessage;
use crate::models::event::{ErrorEvent, ErrorSource, Origin, TrackingEvent};
use crate::models::order::{OrderId, TrackingSnapshot};

pub const STATUS_UPDATE: &str = "status_update";
pub const QR_SCANNED: &str = "qr_scanned";
pub const CHAT_MESSAGE: &str = "chat_message";
pub const CHAT_ENABLED: &str = "chat_enabled";
pub const SERVER_ERROR: &str = "error";

pub const JOIN_ORDER: &str = "join_order";
pub const LEAVE_ORDER: &str = "leave_order";
pub const SEND_MESSAGE: &str = "send_message";

/// One named event on the wire: `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }

    pub fn join_order(order_id: &OrderId) -> Self {
        Self::new(JOIN_ORDER, json!({ "orderId": order_id }))
    }

    pub fn leave_order(order_id: &OrderId) -> Self {
        Self::new(LEAVE_ORDER, json!({ "orderId": order_id }))
    }

    pub fn send_message(message: &ChatMessage) -> Result<Self, TrackingError> {
        Ok(Self::new(SEND_MESSAGE, serde_json::to_value(message)?))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagPayload {
    order_id: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerErrorPayload {
    message: String,
    #[serde(default)]
    order_id: Option<String>,
}

/// Turns an inbound frame into a bus event, rejecting unknown names and shapes.
pub fn decode(frame: Frame) -> Result<TrackingEvent, TrackingError> {
    let Frame { event, data } = frame;

    let decoded = match event.as_str() {
        STATUS_UPDATE => TrackingEvent::StatusUpdate {
            snapshot: serde_json::from_value::<TrackingSnapshot>(data)?,
            origin: Origin::Push,
        },
        QR_SCANNED => {
            let payload: FlagPayload = serde_json::from_value(data)?;
            TrackingEvent::QrScanned {
                order_id: payload.order_id,
                at: payload.timestamp,
            }
        }
        CHAT_ENABLED => {
            let payload: FlagPayload = serde_json::from_value(data)?;
            TrackingEvent::ChatEnabled {
                order_id: payload.order_id,
                at: payload.timestamp,
            }
        }
        CHAT_MESSAGE => TrackingEvent::ChatMessage(serde_json::from_value(data)?),
        SERVER_ERROR => {
            let payload: ServerErrorPayload = serde_json::from_value(data)?;
            let order_id = payload.order_id.and_then(|raw| OrderId::new(raw).ok());
            TrackingEvent::Error(ErrorEvent {
                source: ErrorSource::Connection,
                message: payload.message,
                endpoint: None,
                order_id,
            })
        }
        other => {
            return Err(TrackingError::Transport(format!(
                "unrecognized event: {other}"
            )));
        }
    };

    Ok(decoded)
}
