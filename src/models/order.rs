use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(raw: impl Into<String>) -> Result<Self, TrackingError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TrackingError::InvalidCandidate(
                "missing orderId".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Confirmed,
    Received,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::Confirmed => 0,
            OrderStatus::Received => 1,
            OrderStatus::Preparing => 2,
            OrderStatus::Ready => 3,
            OrderStatus::OutForDelivery => 4,
            OrderStatus::Delivered => 5,
            OrderStatus::Cancelled => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Received => "received",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = TrackingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "confirmed" => Ok(OrderStatus::Confirmed),
            "received" => Ok(OrderStatus::Received),
            "preparing" => Ok(OrderStatus::Preparing),
            "ready" => Ok(OrderStatus::Ready),
            "out_for_delivery" => Ok(OrderStatus::OutForDelivery),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(TrackingError::InvalidCandidate(format!(
                "unrecognized status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTrackingState {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub qr_scanned: bool,
    pub chat_enabled: bool,
    pub driver_info: Option<DriverInfo>,
    pub driver_location: Option<DriverLocation>,
    pub estimated_time: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl OrderTrackingState {
    pub fn new(order_id: OrderId, status: OrderStatus, last_updated: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status,
            qr_scanned: false,
            chat_enabled: false,
            driver_info: None,
            driver_location: None,
            estimated_time: None,
            last_updated,
        }
    }
}

/// Order state as reported by the server, either pushed or polled.
///
/// Every field except `lastUpdated` may be absent; absent fields inherit the
/// value of the state currently held for the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub qr_scanned: Option<bool>,
    #[serde(default)]
    pub chat_enabled: Option<bool>,
    #[serde(default)]
    pub driver_info: Option<DriverInfo>,
    #[serde(default)]
    pub driver_location: Option<DriverLocation>,
    #[serde(default)]
    pub estimated_time: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl TrackingSnapshot {
    pub fn new(order_id: &str, status: &str, last_updated: DateTime<Utc>) -> Self {
        Self {
            order_id: Some(order_id.to_string()),
            status: Some(status.to_string()),
            qr_scanned: None,
            chat_enabled: None,
            driver_info: None,
            driver_location: None,
            estimated_time: None,
            last_updated,
        }
    }

    /// Validates the snapshot for `expected` and fills absent fields from `current`.
    pub fn into_candidate(
        self,
        expected: &OrderId,
        current: Option<&OrderTrackingState>,
    ) -> Result<OrderTrackingState, TrackingError> {
        let order_id = OrderId::new(self.order_id.unwrap_or_default())?;
        if &order_id != expected {
            return Err(TrackingError::InvalidCandidate(format!(
                "snapshot for order {order_id} delivered to order {expected}"
            )));
        }

        let status = match (self.status, current) {
            (Some(raw), _) => raw.parse::<OrderStatus>()?,
            (None, Some(current)) => current.status,
            (None, None) => {
                return Err(TrackingError::InvalidCandidate(
                    "missing status".to_string(),
                ));
            }
        };

        Ok(OrderTrackingState {
            order_id,
            status,
            qr_scanned: self
                .qr_scanned
                .unwrap_or_else(|| current.is_some_and(|c| c.qr_scanned)),
            chat_enabled: self
                .chat_enabled
                .unwrap_or_else(|| current.is_some_and(|c| c.chat_enabled)),
            driver_info: self
                .driver_info
                .or_else(|| current.and_then(|c| c.driver_info.clone())),
            driver_location: self
                .driver_location
                .or_else(|| current.and_then(|c| c.driver_location.clone())),
            estimated_time: self
                .estimated_time
                .or_else(|| current.and_then(|c| c.estimated_time.clone())),
            last_updated: self.last_updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{DriverInfo, OrderId, OrderStatus, OrderTrackingState, TrackingSnapshot};
    use crate::error::TrackingError;

    #[test]
    fn status_parses_wire_names() {
        assert_eq!(
            "out_for_delivery".parse::<OrderStatus>().unwrap(),
            OrderStatus::OutForDelivery
        );
        assert!(matches!(
            "lost_in_space".parse::<OrderStatus>(),
            Err(TrackingError::InvalidCandidate(_))
        ));
    }

    #[test]
    fn ranks_follow_lifecycle_order() {
        assert!(OrderStatus::Confirmed.rank() < OrderStatus::Preparing.rank());
        assert!(OrderStatus::Ready.rank() < OrderStatus::OutForDelivery.rank());
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::OutForDelivery.is_terminal());
    }

    #[test]
    fn blank_order_id_is_rejected() {
        assert!(OrderId::new("   ").is_err());
        assert_eq!(OrderId::new(" ord-1 ").unwrap().as_str(), "ord-1");
    }

    #[test]
    fn snapshot_without_order_id_is_rejected() {
        let order_id = OrderId::new("ord-1").unwrap();
        let mut snapshot = TrackingSnapshot::new("ord-1", "ready", Utc::now());
        snapshot.order_id = None;

        assert!(snapshot.into_candidate(&order_id, None).is_err());
    }

    #[test]
    fn snapshot_for_other_order_is_rejected() {
        let order_id = OrderId::new("ord-1").unwrap();
        let snapshot = TrackingSnapshot::new("ord-2", "ready", Utc::now());

        assert!(snapshot.into_candidate(&order_id, None).is_err());
    }

    #[test]
    fn partial_snapshot_inherits_current_fields() {
        let order_id = OrderId::new("ord-1").unwrap();
        let mut current = OrderTrackingState::new(
            order_id.clone(),
            OrderStatus::OutForDelivery,
            Utc.timestamp_millis_opt(100).unwrap(),
        );
        current.qr_scanned = true;
        current.driver_info = Some(DriverInfo {
            name: "Ama".to_string(),
            phone: "+233200000000".to_string(),
        });

        let mut snapshot = TrackingSnapshot::new(
            "ord-1",
            "out_for_delivery",
            Utc.timestamp_millis_opt(200).unwrap(),
        );
        snapshot.status = None;
        snapshot.estimated_time = Some("10 min".to_string());

        let candidate = snapshot.into_candidate(&order_id, Some(&current)).unwrap();
        assert_eq!(candidate.status, OrderStatus::OutForDelivery);
        assert!(candidate.qr_scanned);
        assert!(!candidate.chat_enabled);
        assert_eq!(candidate.driver_info, current.driver_info);
        assert_eq!(candidate.estimated_time.as_deref(), Some("10 min"));
    }

    #[test]
    fn snapshot_deserializes_from_camel_case() {
        let snapshot: TrackingSnapshot = serde_json::from_value(serde_json::json!({
            "orderId": "ord-9",
            "status": "preparing",
            "qrScanned": false,
            "driverLocation": { "latitude": 5.6, "longitude": -0.18 },
            "lastUpdated": "2026-01-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(snapshot.order_id.as_deref(), Some("ord-9"));
        assert_eq!(snapshot.qr_scanned, Some(false));
        assert!(snapshot.chat_enabled.is_none());
        assert_eq!(snapshot.driver_location.unwrap().address, None);
    }
}
