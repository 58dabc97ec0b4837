use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::frame::{self, Frame};
use crate::api::{LinkEvent, Transport};
use crate::engine::bus::EventBus;
use crate::models::event::{ErrorEvent, ErrorSource, TrackingEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

struct ActiveLink {
    endpoint: String,
    generation: u64,
    outbound: mpsc::Sender<Frame>,
    up: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

type Slot = Arc<Mutex<Option<ActiveLink>>>;

/// Failed connects and unexpected drops are published on the bus as
/// [`TrackingEvent::Error`]; nothing is returned to callers.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    slot: Slot,
    generations: AtomicU64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, bus: Arc<EventBus>) -> Self {
        Self {
            transport,
            bus,
            slot: Arc::new(Mutex::new(None)),
            generations: AtomicU64::new(0),
        }
    }

    pub async fn connect(&self, endpoint: &str) {
        {
            let slot = lock(&self.slot);
            if let Some(active) = slot.as_ref() {
                if active.endpoint == endpoint {
                    debug!(endpoint = %endpoint, "already connected");
                    return;
                }
            }
        }

        self.disconnect();

        let link = match self.transport.open(endpoint).await {
            Ok(link) => link,
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "tracking connection failed");
                self.bus
                    .publish(TrackingEvent::Error(ErrorEvent::connection(err.to_string(), endpoint)));
                return;
            }
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let up = Arc::new(AtomicBool::new(true));
        {
            let mut slot = lock(&self.slot);
            if slot.is_some() {
                debug!(endpoint = %endpoint, "concurrent connect won; closing duplicate link");
                return;
            }
            *slot = Some(ActiveLink {
                endpoint: endpoint.to_string(),
                generation,
                outbound: link.outbound,
                up: up.clone(),
                reader: None,
            });
        }

        info!(endpoint = %endpoint, "tracking connection established");
        self.bus.publish(TrackingEvent::Connected {
            endpoint: endpoint.to_string(),
        });

        let reader = tokio::spawn(read_link(
            link.inbound,
            self.bus.clone(),
            self.slot.clone(),
            endpoint.to_string(),
            generation,
            up,
        ));

        let mut slot = lock(&self.slot);
        match slot.as_mut() {
            Some(active) if active.generation == generation => active.reader = Some(reader),
            _ => reader.abort(),
        }
    }

    pub fn disconnect(&self) {
        let Some(active) = lock(&self.slot).take() else {
            return;
        };

        if let Some(reader) = active.reader {
            reader.abort();
        }
        drop(active.outbound);

        info!(endpoint = %active.endpoint, "tracking connection closed");
        if active.up.swap(false, Ordering::SeqCst) {
            self.bus.publish(TrackingEvent::Disconnected {
                endpoint: active.endpoint,
            });
        }
    }

    /// Hands a frame to the transport. Returns `false` if it was dropped.
    pub fn emit(&self, frame: Frame) -> bool {
        let sender = {
            let slot = lock(&self.slot);
            match slot.as_ref() {
                Some(active) if active.up.load(Ordering::SeqCst) => active.outbound.clone(),
                _ => {
                    debug!(event = %frame.event, "not connected; frame dropped");
                    return false;
                }
            }
        };

        match sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                warn!(event = %frame.event, "outbound buffer full; frame dropped");
                false
            }
            Err(TrySendError::Closed(frame)) => {
                debug!(event = %frame.event, "transport closed; frame dropped");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.slot)
            .as_ref()
            .is_some_and(|active| active.up.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub fn endpoint(&self) -> Option<String> {
        lock(&self.slot).as_ref().map(|active| active.endpoint.clone())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = lock(&self.slot).take() {
            if let Some(reader) = active.reader {
                reader.abort();
            }
        }
    }
}

async fn read_link(
    mut inbound: mpsc::Receiver<LinkEvent>,
    bus: Arc<EventBus>,
    slot: Slot,
    endpoint: String,
    generation: u64,
    up: Arc<AtomicBool>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            LinkEvent::Frame(raw) => {
                let name = raw.event.clone();
                match frame::decode(raw) {
                    Ok(event) => bus.publish(event),
                    Err(err) => {
                        warn!(event = %name, error = %err, "rejected inbound frame");
                        bus.publish(payload_error(format!("{name}: {err}"), &endpoint));
                    }
                }
            }
            LinkEvent::Malformed(reason) => {
                warn!(endpoint = %endpoint, error = %reason, "unparseable inbound frame");
                bus.publish(payload_error(format!("malformed frame: {reason}"), &endpoint));
            }
            LinkEvent::Down(reason) => {
                if up.swap(false, Ordering::SeqCst) {
                    warn!(endpoint = %endpoint, reason = %reason, "tracking connection lost");
                    bus.publish(TrackingEvent::Error(ErrorEvent::connection(reason, &endpoint)));
                    bus.publish(TrackingEvent::Disconnected {
                        endpoint: endpoint.clone(),
                    });
                }
            }
            LinkEvent::Up => {
                if !up.swap(true, Ordering::SeqCst) {
                    info!(endpoint = %endpoint, "tracking connection restored");
                    bus.publish(TrackingEvent::Connected {
                        endpoint: endpoint.clone(),
                    });
                }
            }
        }
    }

    let was_current = {
        let mut slot = lock(&slot);
        let is_current = slot
            .as_ref()
            .is_some_and(|active| active.generation == generation);
        if is_current {
            *slot = None;
        }
        is_current
    };

    if was_current && up.swap(false, Ordering::SeqCst) {
        warn!(endpoint = %endpoint, "tracking connection ended");
        bus.publish(TrackingEvent::Disconnected { endpoint });
    }
}

fn payload_error(message: String, endpoint: &str) -> TrackingEvent {
    TrackingEvent::Error(ErrorEvent {
        source: ErrorSource::Payload,
        message,
        endpoint: Some(endpoint.to_string()),
        order_id: None,
    })
}

fn lock(slot: &Mutex<Option<ActiveLink>>) -> MutexGuard<'_, Option<ActiveLink>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
