use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::notify::NotificationScheduler;
use crate::api::rest::OrderFetcher;
use crate::api::Transport;
use crate::config::Config;
use crate::engine::bus::{EventBus, Handler};
use crate::engine::chat::{ChatStream, Receipt};
use crate::engine::connection::{ConnectionManager, ConnectionStatus};
use crate::engine::notifier::NotificationDispatcher;
use crate::engine::poller::FallbackPoller;
use crate::engine::rooms::RoomMembership;
use crate::engine::state_machine::{OrderStateMachine, Reconciliation, ServerFlag};
use crate::error::TrackingError;
use crate::models::chat::ChatMessage;
use crate::models::event::{ErrorEvent, ErrorSource, EventKind, Origin, TrackingEvent};
use crate::models::order::{OrderId, TrackingSnapshot};
use crate::observability::metrics::Metrics;
use crate::tracker::TrackingView;

pub struct OrderSession {
    pub machine: OrderStateMachine,
    pub chat: ChatStream,
    pub last_error: Option<ErrorEvent>,
    pub views: usize,
    /// Views currently counted in the room membership.
    pub joined: usize,
    pub handlers: Vec<(EventKind, Handler)>,
    pub view_tx: watch::Sender<TrackingView>,
}

impl OrderSession {
    pub fn new(order_id: OrderId, connection: ConnectionStatus, handlers: Vec<(EventKind, Handler)>) -> Self {
        let (view_tx, _) = watch::channel(TrackingView::empty(order_id.clone(), connection));
        Self {
            machine: OrderStateMachine::new(order_id.clone()),
            chat: ChatStream::new(order_id),
            last_error: None,
            views: 0,
            joined: 0,
            handlers,
            view_tx,
        }
    }

    pub fn view(&self, connection: ConnectionStatus) -> TrackingView {
        TrackingView {
            order_id: self.machine.order_id().clone(),
            state: self.machine.state().cloned(),
            ui: self.machine.ui(),
            messages: self.chat.messages().to_vec(),
            connection,
            last_error: self.last_error.clone(),
        }
    }

    pub fn publish_view(&self, connection: ConnectionStatus) {
        self.view_tx.send_replace(self.view(connection));
    }
}

pub struct TrackerInner {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub connection: Arc<ConnectionManager>,
    pub rooms: RoomMembership,
    pub poller: FallbackPoller,
    pub notifier: NotificationDispatcher,
    pub sessions: DashMap<OrderId, OrderSession>,
    pub metrics: Metrics,
}

impl TrackerInner {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn OrderFetcher>,
        scheduler: Arc<dyn NotificationScheduler>,
    ) -> Self {
        let metrics = Metrics::new();
        let bus = Arc::new(EventBus::new());
        let connection = Arc::new(ConnectionManager::new(transport, bus.clone()));

        Self {
            config,
            rooms: RoomMembership::new(connection.clone()),
            poller: FallbackPoller::new(fetcher, bus.clone(), metrics.clone()),
            notifier: NotificationDispatcher::new(scheduler, metrics.clone()),
            sessions: DashMap::new(),
            bus,
            connection,
            metrics,
        }
    }

    pub fn apply_status(&self, order_id: &OrderId, snapshot: TrackingSnapshot, origin: Origin) {
        let outcome = {
            let Some(mut session) = self.sessions.get_mut(order_id) else {
                debug!(order_id = %order_id, origin = origin.as_str(), "status for untracked order ignored");
                return;
            };
            let outcome = session.machine.reconcile_snapshot(snapshot);
            if matches!(outcome, Ok(Reconciliation::Accepted(_))) {
                session.publish_view(self.connection.status());
            }
            outcome
        };

        self.settle(order_id, origin.as_str(), outcome);
    }

    pub fn apply_flag(&self, order_id: &OrderId, flag: ServerFlag, at: Option<DateTime<Utc>>) {
        let outcome = {
            let Some(mut session) = self.sessions.get_mut(order_id) else {
                debug!(order_id = %order_id, ?flag, "flag for untracked order ignored");
                return;
            };
            let Some(outcome) = session.machine.apply_flag(flag, at) else {
                debug!(order_id = %order_id, ?flag, "flag held until first status");
                return;
            };
            if matches!(outcome, Reconciliation::Accepted(_)) {
                session.publish_view(self.connection.status());
            }
            outcome
        };

        self.settle(order_id, "push", Ok(outcome));
    }

    // Runs after the session guard is released; may publish on the bus.
    fn settle(&self, order_id: &OrderId, origin: &str, outcome: Result<Reconciliation, TrackingError>) {
        match outcome {
            Ok(Reconciliation::Accepted(transition)) => {
                self.metrics
                    .reconciliations_total
                    .with_label_values(&["accepted"])
                    .inc();
                info!(
                    order_id = %order_id,
                    status = %transition.current.status,
                    origin,
                    "order state reconciled"
                );
                self.notifier.dispatch(&transition);
            }
            Ok(Reconciliation::Stale) => {
                self.metrics
                    .reconciliations_total
                    .with_label_values(&["stale"])
                    .inc();
                debug!(order_id = %order_id, origin, "stale candidate discarded");
            }
            Err(err) => {
                self.metrics
                    .reconciliations_total
                    .with_label_values(&["rejected"])
                    .inc();
                warn!(order_id = %order_id, origin, error = %err, "candidate rejected");
                self.bus.publish(TrackingEvent::Error(
                    ErrorEvent::for_order(ErrorSource::Reconcile, err.to_string(), order_id),
                ));
            }
        }
    }

    pub fn apply_chat(&self, message: ChatMessage) {
        let order_id = message.order_id.clone();
        let receipt = {
            let Some(mut session) = self.sessions.get_mut(&order_id) else {
                debug!(order_id = %order_id, "chat message for untracked order ignored");
                return;
            };
            let receipt = session.chat.receive(message);
            if matches!(receipt, Ok(Receipt::Appended | Receipt::Confirmed)) {
                session.publish_view(self.connection.status());
            }
            receipt
        };

        match receipt {
            Ok(Receipt::Appended) => {
                self.metrics
                    .chat_messages_total
                    .with_label_values(&["received"])
                    .inc();
            }
            Ok(Receipt::Confirmed) => {
                self.metrics
                    .chat_messages_total
                    .with_label_values(&["confirmed"])
                    .inc();
            }
            Ok(Receipt::Duplicate) => {
                debug!(order_id = %order_id, "duplicate chat message ignored");
                self.metrics
                    .chat_messages_total
                    .with_label_values(&["duplicate"])
                    .inc();
            }
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "chat message rejected");
                self.metrics
                    .chat_messages_total
                    .with_label_values(&["rejected"])
                    .inc();
                self.bus.publish(TrackingEvent::Error(
                    ErrorEvent::for_order(ErrorSource::Chat, err.to_string(), &order_id),
                ));
            }
        }
    }

    pub fn record_error(&self, order_id: &OrderId, error: &ErrorEvent) {
        if let Some(mut session) = self.sessions.get_mut(order_id) {
            session.last_error = Some(error.clone());
            session.publish_view(self.connection.status());
        }
    }

    /// Order-less errors (connection, undecodable frames) surface on every view.
    pub fn record_global_error(&self, error: &ErrorEvent) {
        if error.source == ErrorSource::Connection {
            self.metrics
                .connection_events_total
                .with_label_values(&["error"])
                .inc();
        }
        let status = self.connection.status();
        for mut session in self.sessions.iter_mut() {
            session.last_error = Some(error.clone());
            session.publish_view(status);
        }
    }

    pub fn on_connected(&self) {
        self.metrics
            .connection_events_total
            .with_label_values(&["connected"])
            .inc();

        for mut session in self.sessions.iter_mut() {
            let order_id = session.key().clone();
            self.join_views(&order_id, &mut session);
            session.publish_view(ConnectionStatus::Connected);
        }
    }

    pub fn join_rooms(&self, order_id: &OrderId) {
        if let Some(mut session) = self.sessions.get_mut(order_id) {
            self.join_views(order_id, &mut session);
        }
    }

    // Joins made while disconnected are dropped by the membership; the next
    // connected edge retries them.
    fn join_views(&self, order_id: &OrderId, session: &mut OrderSession) {
        while session.joined < session.views {
            if !self.rooms.join(order_id) {
                break;
            }
            session.joined += 1;
        }
    }

    pub fn on_disconnected(&self) {
        self.metrics
            .connection_events_total
            .with_label_values(&["disconnected"])
            .inc();

        self.rooms.reset();
        for mut session in self.sessions.iter_mut() {
            session.joined = 0;
            session.publish_view(ConnectionStatus::Disconnected);
        }
    }

    /// Closes one view of `order_id`. Returns the session's bus handlers when
    /// it was the last view and the session was discarded.
    pub fn release_view(&self, order_id: &OrderId) -> Option<Vec<(EventKind, Handler)>> {
        {
            let mut session = self.sessions.get_mut(order_id)?;
            session.views = session.views.saturating_sub(1);
            if session.joined > 0 {
                self.rooms.leave(order_id);
                session.joined -= 1;
            }
            if session.views > 0 {
                return None;
            }
        }

        let (_, session) = self
            .sessions
            .remove_if(order_id, |_, session| session.views == 0)?;
        self.poller.stop(order_id);
        self.metrics.tracked_orders.set(self.sessions.len() as i64);
        info!(order_id = %order_id, "order tracking stopped");
        Some(session.handlers)
    }
}
