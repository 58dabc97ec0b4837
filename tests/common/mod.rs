#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use order_tracking::api::frame::Frame;
use order_tracking::api::memory::{MemoryPeer, MemoryTransport};
use order_tracking::api::notify::{Notification, NotificationScheduler};
use order_tracking::api::rest::OrderFetcher;
use order_tracking::models::order::{OrderId, TrackingSnapshot};
use order_tracking::{Config, OrderTracker, TrackingError};

pub const ENDPOINT: &str = "mem://tracking";

/// Answers polls with a configurable snapshot, or a 503 when none is set.
#[derive(Default)]
pub struct StubFetcher {
    snapshot: Mutex<Option<TrackingSnapshot>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn respond_with(&self, snapshot: TrackingSnapshot) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderFetcher for StubFetcher {
    async fn fetch(&self, _order_id: &OrderId) -> Result<TrackingSnapshot, TrackingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TrackingError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            })
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingScheduler {
    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|notification| notification.title.clone())
            .collect()
    }
}

impl NotificationScheduler for RecordingScheduler {
    fn schedule(&self, notification: &Notification) -> Result<(), TrackingError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub tracker: OrderTracker,
    pub transport: Arc<MemoryTransport>,
    pub peers: mpsc::UnboundedReceiver<MemoryPeer>,
    pub fetcher: Arc<StubFetcher>,
    pub scheduler: Arc<RecordingScheduler>,
}

impl Harness {
    /// A tracker that polls rarely enough that only pushed frames and
    /// explicit refreshes drive state.
    pub fn new() -> Self {
        let config = Config {
            ws_url: ENDPOINT.to_string(),
            poll_interval: Duration::from_secs(3_600),
            ..Config::default()
        };
        let (transport, peers) = MemoryTransport::new(64);
        let transport = Arc::new(transport);
        let fetcher = Arc::new(StubFetcher::default());
        let scheduler = Arc::new(RecordingScheduler::default());

        let tracker = OrderTracker::new(
            config,
            transport.clone(),
            fetcher.clone(),
            scheduler.clone(),
        );

        Self {
            tracker,
            transport,
            peers,
            fetcher,
            scheduler,
        }
    }

    /// Makes polls for `order_id` succeed with an old snapshot so that they
    /// neither fail nor override pushed state.
    pub fn quiet_polls(&self, order_id: &str) {
        let at = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(1).expect("valid timestamp");
        self.fetcher
            .respond_with(TrackingSnapshot::new(order_id, "confirmed", at));
    }

    pub async fn connect(&mut self) -> MemoryPeer {
        self.tracker.connect().await;
        self.peers.recv().await.expect("transport opened a link")
    }
}

pub fn status_frame(order_id: &str, status: &str, last_updated_ms: i64) -> Frame {
    status_frame_with(order_id, status, last_updated_ms, json!({}))
}

pub fn status_frame_with(order_id: &str, status: &str, last_updated_ms: i64, extra: Value) -> Frame {
    let mut data = json!({
        "orderId": order_id,
        "status": status,
        "lastUpdated": timestamp(last_updated_ms),
    });
    if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            data.insert(key.clone(), value.clone());
        }
    }
    Frame::new("status_update", data)
}

pub fn chat_frame(order_id: &str, id: &str, text: &str, at_ms: i64) -> Frame {
    Frame::new(
        "chat_message",
        json!({
            "id": id,
            "orderId": order_id,
            "text": text,
            "sender": "driver",
            "timestamp": timestamp(at_ms),
        }),
    )
}

pub fn timestamp(ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .expect("valid timestamp")
        .to_rfc3339()
}

/// Polls `condition` until it holds or a second has passed.
pub async fn wait_for<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Gives spawned tasks a chance to drain already-queued work.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

pub async fn next_sent(peer: &mut MemoryPeer) -> Option<Frame> {
    tokio::time::timeout(Duration::from_secs(1), peer.next_sent())
        .await
        .ok()
        .flatten()
}
