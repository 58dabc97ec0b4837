use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::rest::OrderFetcher;
use crate::engine::bus::EventBus;
use crate::models::event::{ErrorEvent, ErrorSource, Origin, TrackingEvent};
use crate::models::order::OrderId;
use crate::observability::metrics::Metrics;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct FallbackPoller {
    fetcher: Arc<dyn OrderFetcher>,
    bus: Arc<EventBus>,
    metrics: Metrics,
    tasks: Mutex<HashMap<OrderId, JoinHandle<()>>>,
}

impl FallbackPoller {
    pub fn new(fetcher: Arc<dyn OrderFetcher>, bus: Arc<EventBus>, metrics: Metrics) -> Self {
        Self {
            fetcher,
            bus,
            metrics,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts polling `order_id`, replacing any poller already running for it.
    /// The first fetch happens immediately.
    pub fn start(&self, order_id: &OrderId, every: Duration) {
        let every = every.max(MIN_INTERVAL);
        let task = tokio::spawn(poll_loop(
            self.fetcher.clone(),
            self.bus.clone(),
            self.metrics.clone(),
            order_id.clone(),
            every,
        ));

        if let Some(previous) = self.lock().insert(order_id.clone(), task) {
            previous.abort();
        }
        info!(order_id = %order_id, interval_ms = every.as_millis() as u64, "fallback polling started");
    }

    pub fn stop(&self, order_id: &OrderId) {
        if let Some(task) = self.lock().remove(order_id) {
            task.abort();
            info!(order_id = %order_id, "fallback polling stopped");
        }
    }

    pub fn is_polling(&self, order_id: &OrderId) -> bool {
        self.lock()
            .get(order_id)
            .is_some_and(|task| !task.is_finished())
    }

    /// Runs one fetch outside the schedule. Returns whether it succeeded.
    pub async fn poll_once(&self, order_id: &OrderId) -> bool {
        fetch_and_publish(&*self.fetcher, &self.bus, &self.metrics, order_id).await
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OrderId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        for (_, task) in self.lock().drain() {
            task.abort();
        }
    }
}

async fn poll_loop(
    fetcher: Arc<dyn OrderFetcher>,
    bus: Arc<EventBus>,
    metrics: Metrics,
    order_id: OrderId,
    every: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        fetch_and_publish(&*fetcher, &bus, &metrics, &order_id).await;
    }
}

async fn fetch_and_publish(
    fetcher: &dyn OrderFetcher,
    bus: &EventBus,
    metrics: &Metrics,
    order_id: &OrderId,
) -> bool {
    match fetcher.fetch(order_id).await {
        Ok(mut snapshot) => {
            if snapshot.order_id.is_none() {
                snapshot.order_id = Some(order_id.as_str().to_string());
            }
            debug!(order_id = %order_id, "poll succeeded");
            metrics.polls_total.with_label_values(&["success"]).inc();
            bus.publish(TrackingEvent::StatusUpdate {
                snapshot,
                origin: Origin::Poll,
            });
            true
        }
        Err(err) => {
            warn!(order_id = %order_id, error = %err, "poll failed");
            metrics.polls_total.with_label_values(&["error"]).inc();
            bus.publish(TrackingEvent::Error(ErrorEvent::for_order(
                ErrorSource::Poll,
                err.to_string(),
                order_id,
            )));
            false
        }
    }
}
