use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::TrackingError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Fire-and-forget local notification scheduling.
pub trait NotificationScheduler: Send + Sync {
    fn schedule(&self, notification: &Notification) -> Result<(), TrackingError>;
}

/// Writes notifications to the log; used when no device scheduler is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogScheduler;

impl NotificationScheduler for LogScheduler {
    fn schedule(&self, notification: &Notification) -> Result<(), TrackingError> {
        info!(
            title = %notification.title,
            body = %notification.body,
            data = %notification.data,
            "notification"
        );
        Ok(())
    }
}
