use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::chat::ChatMessage;
use crate::models::order::{OrderId, TrackingSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    Disconnected,
    StatusUpdate,
    QrScanned,
    ChatMessage,
    ChatEnabled,
    Error,
}

/// Where a status update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Push,
    Poll,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Push => "push",
            Origin::Poll => "poll",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Connection,
    Poll,
    Payload,
    Reconcile,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub source: ErrorSource,
    pub message: String,
    pub endpoint: Option<String>,
    pub order_id: Option<OrderId>,
}

impl ErrorEvent {
    pub fn connection(message: impl Into<String>, endpoint: &str) -> Self {
        Self {
            source: ErrorSource::Connection,
            message: message.into(),
            endpoint: Some(endpoint.to_string()),
            order_id: None,
        }
    }

    pub fn for_order(source: ErrorSource, message: impl Into<String>, order_id: &OrderId) -> Self {
        Self {
            source,
            message: message.into(),
            endpoint: None,
            order_id: Some(order_id.clone()),
        }
    }
}

/// Everything that travels over the local event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    Connected { endpoint: String },
    Disconnected { endpoint: String },
    StatusUpdate { snapshot: TrackingSnapshot, origin: Origin },
    QrScanned { order_id: String, at: Option<DateTime<Utc>> },
    ChatEnabled { order_id: String, at: Option<DateTime<Utc>> },
    ChatMessage(ChatMessage),
    Error(ErrorEvent),
}

impl TrackingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TrackingEvent::Connected { .. } => EventKind::Connected,
            TrackingEvent::Disconnected { .. } => EventKind::Disconnected,
            TrackingEvent::StatusUpdate { .. } => EventKind::StatusUpdate,
            TrackingEvent::QrScanned { .. } => EventKind::QrScanned,
            TrackingEvent::ChatEnabled { .. } => EventKind::ChatEnabled,
            TrackingEvent::ChatMessage(_) => EventKind::ChatMessage,
            TrackingEvent::Error(_) => EventKind::Error,
        }
    }

    /// The order an event is scoped to, if any.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            TrackingEvent::StatusUpdate { snapshot, .. } => snapshot.order_id.as_deref(),
            TrackingEvent::QrScanned { order_id, .. }
            | TrackingEvent::ChatEnabled { order_id, .. } => Some(order_id.as_str()),
            TrackingEvent::ChatMessage(message) => Some(message.order_id.as_str()),
            TrackingEvent::Error(error) => error.order_id.as_ref().map(OrderId::as_str),
            TrackingEvent::Connected { .. } | TrackingEvent::Disconnected { .. } => None,
        }
    }
}
