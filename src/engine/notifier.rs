use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::api::notify::{Notification, NotificationScheduler};
use crate::engine::state_machine::Transition;
use crate::models::order::OrderStatus;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    OrderAccepted,
    OrderReady,
    OnItsWay,
    Delivered,
    Cancelled,
}

impl NotificationKind {
    pub fn for_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Preparing => Some(NotificationKind::OrderAccepted),
            OrderStatus::Ready => Some(NotificationKind::OrderReady),
            OrderStatus::OutForDelivery => Some(NotificationKind::OnItsWay),
            OrderStatus::Delivered => Some(NotificationKind::Delivered),
            OrderStatus::Cancelled => Some(NotificationKind::Cancelled),
            OrderStatus::Confirmed | OrderStatus::Received => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            NotificationKind::OrderAccepted => "Order accepted",
            NotificationKind::OrderReady => "Order ready",
            NotificationKind::OnItsWay => "Order on its way",
            NotificationKind::Delivered => "Order delivered",
            NotificationKind::Cancelled => "Order cancelled",
        }
    }

    pub fn body(self) -> &'static str {
        match self {
            NotificationKind::OrderAccepted => "The restaurant accepted your order and is preparing it.",
            NotificationKind::OrderReady => "Your order is ready and waiting for the driver.",
            NotificationKind::OnItsWay => "Your driver picked up the order and is heading to you.",
            NotificationKind::Delivered => "Your order has been delivered. Enjoy your meal!",
            NotificationKind::Cancelled => "Your order has been cancelled.",
        }
    }
}

/// Picks the notification for an accepted transition, if any.
///
/// A status notifies only the first time the order climbs to it, and nothing
/// notifies once a terminal status has been reached.
pub fn select(transition: &Transition) -> Option<NotificationKind> {
    let previous = transition.previous.as_ref()?;
    let current = &transition.current;
    if transition.was_terminal || previous.status == current.status {
        return None;
    }

    let kind = NotificationKind::for_status(current.status)?;
    let first_entry = current.status == OrderStatus::Cancelled
        || transition
            .peak
            .is_none_or(|peak| peak.rank() < current.status.rank());
    first_entry.then_some(kind)
}

pub struct NotificationDispatcher {
    scheduler: Arc<dyn NotificationScheduler>,
    metrics: Metrics,
}

impl NotificationDispatcher {
    pub fn new(scheduler: Arc<dyn NotificationScheduler>, metrics: Metrics) -> Self {
        Self { scheduler, metrics }
    }

    /// Fires at most one notification. Scheduling failures are logged only.
    pub fn dispatch(&self, transition: &Transition) -> Option<NotificationKind> {
        let kind = select(transition)?;
        let current = &transition.current;
        let notification = Notification {
            title: kind.title().to_string(),
            body: kind.body().to_string(),
            data: json!({
                "orderId": current.order_id,
                "status": current.status,
            }),
        };

        match self.scheduler.schedule(&notification) {
            Ok(()) => {
                debug!(order_id = %current.order_id, title = kind.title(), "notification scheduled");
                self.metrics
                    .notifications_total
                    .with_label_values(&["scheduled"])
                    .inc();
            }
            Err(err) => {
                warn!(order_id = %current.order_id, error = %err, "notification scheduling failed");
                self.metrics
                    .notifications_total
                    .with_label_values(&["failed"])
                    .inc();
            }
        }

        Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{TimeZone, Utc};

    use super::{select, NotificationDispatcher, NotificationKind};
    use crate::api::notify::{Notification, NotificationScheduler};
    use crate::engine::state_machine::{Transition, UiConfig};
    use crate::error::TrackingError;
    use crate::models::order::{OrderId, OrderStatus, OrderTrackingState};
    use crate::observability::metrics::Metrics;

    fn state(status: OrderStatus) -> OrderTrackingState {
        OrderTrackingState::new(
            OrderId::new("ord-1").unwrap(),
            status,
            Utc.timestamp_millis_opt(100).unwrap(),
        )
    }

    fn step(from: Option<OrderStatus>, to: OrderStatus) -> Transition {
        let current = state(to);
        Transition {
            previous: from.map(state),
            ui: UiConfig::derive(&current, None),
            current,
            peak: from,
            was_terminal: from.is_some_and(OrderStatus::is_terminal),
        }
    }

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    impl NotificationScheduler for Recording {
        fn schedule(&self, notification: &Notification) -> Result<(), TrackingError> {
            if self.fail {
                return Err(TrackingError::Notification("permission denied".to_string()));
            }
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[test]
    fn first_observation_never_notifies() {
        assert_eq!(select(&step(None, OrderStatus::Ready)), None);
    }

    #[test]
    fn unchanged_status_never_notifies() {
        assert_eq!(select(&step(Some(OrderStatus::Ready), OrderStatus::Ready)), None);
    }

    #[test]
    fn forward_transitions_pick_the_table_entry() {
        let cases = [
            (OrderStatus::Received, OrderStatus::Preparing, Some(NotificationKind::OrderAccepted)),
            (OrderStatus::Preparing, OrderStatus::Ready, Some(NotificationKind::OrderReady)),
            (OrderStatus::Ready, OrderStatus::OutForDelivery, Some(NotificationKind::OnItsWay)),
            (OrderStatus::OutForDelivery, OrderStatus::Delivered, Some(NotificationKind::Delivered)),
            (OrderStatus::Confirmed, OrderStatus::Received, None),
            (OrderStatus::Confirmed, OrderStatus::Ready, Some(NotificationKind::OrderReady)),
        ];

        for (from, to, expected) in cases {
            assert_eq!(select(&step(Some(from), to)), expected, "{from} -> {to}");
        }
    }

    #[test]
    fn backward_transition_does_not_notify() {
        assert_eq!(select(&step(Some(OrderStatus::Ready), OrderStatus::Preparing)), None);
    }

    #[test]
    fn re_entering_a_status_below_the_peak_does_not_notify() {
        let mut again = step(Some(OrderStatus::Preparing), OrderStatus::Ready);
        again.peak = Some(OrderStatus::Ready);
        assert_eq!(select(&again), None);

        let mut onward = step(Some(OrderStatus::Preparing), OrderStatus::OutForDelivery);
        onward.peak = Some(OrderStatus::Ready);
        assert_eq!(select(&onward), Some(NotificationKind::OnItsWay));
    }

    #[test]
    fn nothing_notifies_after_a_terminal_status() {
        let mut back_again = step(Some(OrderStatus::OutForDelivery), OrderStatus::Delivered);
        back_again.peak = Some(OrderStatus::Delivered);
        back_again.was_terminal = true;
        assert_eq!(select(&back_again), None);

        let mut cancelled = step(Some(OrderStatus::OutForDelivery), OrderStatus::Cancelled);
        cancelled.peak = Some(OrderStatus::Delivered);
        cancelled.was_terminal = true;
        assert_eq!(select(&cancelled), None);
    }

    #[test]
    fn cancellation_notifies_from_any_non_terminal_state() {
        for from in [OrderStatus::Confirmed, OrderStatus::Ready, OrderStatus::OutForDelivery] {
            assert_eq!(
                select(&step(Some(from), OrderStatus::Cancelled)),
                Some(NotificationKind::Cancelled)
            );
        }
        assert_eq!(
            select(&step(Some(OrderStatus::Delivered), OrderStatus::Cancelled)),
            None
        );
    }

    #[test]
    fn dispatch_schedules_with_order_data() {
        let scheduler = Arc::new(Recording::default());
        let dispatcher = NotificationDispatcher::new(scheduler.clone(), Metrics::new());

        let kind = dispatcher.dispatch(&step(Some(OrderStatus::Preparing), OrderStatus::Ready));

        assert_eq!(kind, Some(NotificationKind::OrderReady));
        let sent = scheduler.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Order ready");
        assert_eq!(sent[0].data["orderId"], "ord-1");
        assert_eq!(sent[0].data["status"], "ready");
    }

    #[test]
    fn scheduling_failure_is_swallowed() {
        let scheduler = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });
        let metrics = Metrics::new();
        let dispatcher = NotificationDispatcher::new(scheduler, metrics.clone());

        let kind = dispatcher.dispatch(&step(Some(OrderStatus::Ready), OrderStatus::OutForDelivery));

        assert_eq!(kind, Some(NotificationKind::OnItsWay));
        assert_eq!(
            metrics
                .notifications_total
                .with_label_values(&["failed"])
                .get(),
            1
        );
    }
}
