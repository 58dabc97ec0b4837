use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

use crate::api::frame::Frame;
use crate::api::notify::{LogScheduler, NotificationScheduler};
use crate::api::rest::{OrderFetcher, RestOrderClient};
use crate::api::ws::WsTransport;
use crate::api::Transport;
use crate::config::Config;
use crate::engine::bus::{handler, EventBus, Handler};
use crate::engine::connection::ConnectionStatus;
use crate::engine::state_machine::{ServerFlag, UiConfig};
use crate::error::TrackingError;
use crate::models::chat::{ChatMessage, DeliveryState};
use crate::models::event::{ErrorEvent, EventKind, TrackingEvent};
use crate::models::order::{OrderId, OrderTrackingState};
use crate::observability::metrics::Metrics;
use crate::state::{OrderSession, TrackerInner};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingView {
    pub order_id: OrderId,
    pub state: Option<OrderTrackingState>,
    pub ui: Option<UiConfig>,
    pub messages: Vec<ChatMessage>,
    pub connection: ConnectionStatus,
    pub last_error: Option<ErrorEvent>,
}

impl TrackingView {
    pub fn empty(order_id: OrderId, connection: ConnectionStatus) -> Self {
        Self {
            order_id,
            state: None,
            ui: None,
            messages: Vec::new(),
            connection,
            last_error: None,
        }
    }
}

#[derive(Clone)]
pub struct OrderTracker {
    inner: Arc<TrackerInner>,
}

impl OrderTracker {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn OrderFetcher>,
        scheduler: Arc<dyn NotificationScheduler>,
    ) -> Self {
        let inner = Arc::new(TrackerInner::new(config, transport, fetcher, scheduler));
        register_connection_handlers(&inner);
        Self { inner }
    }

    pub fn from_config(config: Config) -> Result<Self, TrackingError> {
        let transport = WsTransport::new(config.reconnect.clone(), config.outbound_buffer_size);
        let fetcher = RestOrderClient::new(&config.api_url, config.http_timeout)?;

        Ok(Self::new(
            config,
            Arc::new(transport),
            Arc::new(fetcher),
            Arc::new(LogScheduler),
        ))
    }

    pub async fn connect(&self) {
        let endpoint = self.inner.config.ws_url.clone();
        self.connect_to(&endpoint).await;
    }

    pub async fn connect_to(&self, endpoint: &str) {
        self.inner.connection.connect(endpoint).await;
    }

    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    pub fn subscribe(&self, order_id: &str) -> Result<TrackingHandle, TrackingError> {
        let order_id = OrderId::new(order_id)?;
        let inner = &self.inner;
        let status = inner.connection.status();

        let (view, started) = match inner.sessions.entry(order_id.clone()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                session.views += 1;
                (session.view_tx.subscribe(), None)
            }
            Entry::Vacant(entry) => {
                let handlers = session_handlers(&self.inner, &order_id);
                let mut session = OrderSession::new(order_id.clone(), status, handlers.clone());
                session.views = 1;
                let view = session.view_tx.subscribe();
                entry.insert(session);
                (view, Some(handlers))
            }
        };

        if let Some(handlers) = started {
            for (kind, handler) in handlers {
                inner.bus.subscribe(kind, handler);
            }
            inner.poller.start(&order_id, inner.config.poll_interval);
            inner.metrics.tracked_orders.set(inner.sessions.len() as i64);
            info!(order_id = %order_id, "order tracking started");
        } else {
            debug!(order_id = %order_id, "additional view opened");
        }
        inner.join_rooms(&order_id);

        Ok(TrackingHandle {
            order_id,
            tracker: Arc::downgrade(&self.inner),
            view,
            released: false,
        })
    }

    /// Sends a chat message. The message is visible in the view immediately;
    /// if the connection is down it is kept locally and marked `Dropped`.
    pub fn send_message(&self, order_id: &str, text: &str) -> Result<ChatMessage, TrackingError> {
        let order_id = OrderId::new(order_id)?;
        let mut message = ChatMessage::outgoing(order_id.clone(), text)?;
        let frame = Frame::send_message(&message)?;

        let inner = &self.inner;
        let forwarded = {
            let mut session = inner
                .sessions
                .get_mut(&order_id)
                .ok_or_else(|| TrackingError::NotTracked(order_id.clone()))?;
            session.chat.push_local(message.clone())?;

            let forwarded = inner.connection.emit(frame);
            message.delivery = if forwarded {
                DeliveryState::Forwarded
            } else {
                DeliveryState::Dropped
            };
            session.chat.mark(&message.id, message.delivery);
            session.publish_view(inner.connection.status());
            forwarded
        };

        let kind = if forwarded { "sent" } else { "dropped" };
        inner.metrics.chat_messages_total.with_label_values(&[kind]).inc();
        debug!(order_id = %order_id, message_id = %message.id, forwarded, "chat message sent");

        Ok(message)
    }

    /// Fetches the order once over REST. Returns whether the fetch succeeded;
    /// failures are also reported on the bus and in the view.
    pub async fn refresh(&self, order_id: &str) -> Result<bool, TrackingError> {
        let order_id = OrderId::new(order_id)?;
        if !self.inner.sessions.contains_key(&order_id) {
            return Err(TrackingError::NotTracked(order_id));
        }
        Ok(self.inner.poller.poll_once(&order_id).await)
    }

    pub fn view(&self, order_id: &str) -> Option<TrackingView> {
        let order_id = OrderId::new(order_id).ok()?;
        let status = self.inner.connection.status();
        self.inner
            .sessions
            .get(&order_id)
            .map(|session| session.view(status))
    }

    pub fn tracked_orders(&self) -> Vec<OrderId> {
        self.inner
            .sessions
            .iter()
            .map(|session| session.key().clone())
            .collect()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.inner.bus.clone()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }
}

pub struct TrackingHandle {
    order_id: OrderId,
    tracker: Weak<TrackerInner>,
    view: watch::Receiver<TrackingView>,
    released: bool,
}

impl TrackingHandle {
    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn current(&self) -> TrackingView {
        self.view.borrow().clone()
    }

    /// Waits for the next view update. `None` once the session is gone.
    pub async fn changed(&mut self) -> Option<TrackingView> {
        self.view.changed().await.ok()?;
        Some(self.view.borrow_and_update().clone())
    }

    pub fn updates(&self) -> WatchStream<TrackingView> {
        WatchStream::new(self.view.clone())
    }

    pub fn unsubscribe(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let Some(inner) = self.tracker.upgrade() else {
            return;
        };

        if let Some(handlers) = inner.release_view(&self.order_id) {
            for (kind, handler) in &handlers {
                inner.bus.unsubscribe(*kind, handler);
            }
        }
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn register_connection_handlers(inner: &Arc<TrackerInner>) {
    let weak = Arc::downgrade(inner);
    inner.bus.subscribe(
        EventKind::Connected,
        handler(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connected();
            }
        }),
    );

    let weak = Arc::downgrade(inner);
    inner.bus.subscribe(
        EventKind::Disconnected,
        handler(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.on_disconnected();
            }
        }),
    );

    let weak = Arc::downgrade(inner);
    inner.bus.subscribe(
        EventKind::Error,
        handler(move |event| {
            if let TrackingEvent::Error(error) = event {
                if error.order_id.is_none() {
                    if let Some(inner) = weak.upgrade() {
                        inner.record_global_error(error);
                    }
                }
            }
        }),
    );
}

// Each handler only reacts to events scoped to `order_id` and never outlives
// the session in effect: a missing session means the event is dropped.
fn session_handlers(inner: &Arc<TrackerInner>, order_id: &OrderId) -> Vec<(EventKind, Handler)> {
    [
        EventKind::StatusUpdate,
        EventKind::QrScanned,
        EventKind::ChatEnabled,
        EventKind::ChatMessage,
        EventKind::Error,
    ]
    .into_iter()
    .map(|kind| {
        let weak = Arc::downgrade(inner);
        let order_id = order_id.clone();
        let handler = handler(move |event| {
            if event.order_id().map(str::trim) != Some(order_id.as_str()) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                route(&inner, &order_id, event);
            }
        });
        (kind, handler)
    })
    .collect()
}

fn route(inner: &TrackerInner, order_id: &OrderId, event: &TrackingEvent) {
    match event {
        TrackingEvent::StatusUpdate { snapshot, origin } => {
            inner.apply_status(order_id, snapshot.clone(), *origin);
        }
        TrackingEvent::QrScanned { at, .. } => {
            inner.apply_flag(order_id, ServerFlag::QrScanned, *at);
        }
        TrackingEvent::ChatEnabled { at, .. } => {
            inner.apply_flag(order_id, ServerFlag::ChatEnabled, *at);
        }
        TrackingEvent::ChatMessage(message) => inner.apply_chat(message.clone()),
        TrackingEvent::Error(error) => inner.record_error(order_id, error),
        TrackingEvent::Connected { .. } | TrackingEvent::Disconnected { .. } => {}
    }
}
