use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::models::event::{EventKind, TrackingEvent};

pub type Handler = Arc<dyn Fn(&TrackingEvent) + Send + Sync>;

pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&TrackingEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

thread_local! {
    // Buses with a dispatch in progress on this thread, innermost last.
    static DISPATCHING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

enum Deferred {
    Subscribe(EventKind, Handler),
    Unsubscribe(EventKind, Handler),
}

#[derive(Default)]
struct BusInner {
    handlers: HashMap<EventKind, Vec<Handler>>,
    deferred: Vec<Deferred>,
}

impl BusInner {
    fn add(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    fn remove(&mut self, kind: EventKind, handler: &Handler) {
        if let Some(list) = self.handlers.get_mut(&kind) {
            if let Some(index) = list.iter().position(|h| Arc::ptr_eq(h, handler)) {
                list.remove(index);
            }
            if list.is_empty() {
                self.handlers.remove(&kind);
            }
        }
    }
}

/// Handlers run in registration order on the publishing thread. Subscribing or
/// unsubscribing from inside a handler takes effect once the outermost dispatch
/// on that thread has finished; calls from other threads apply at once.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: Handler) {
        let reentrant = self.dispatching();
        let mut inner = self.lock();
        if reentrant {
            inner.deferred.push(Deferred::Subscribe(kind, handler));
        } else {
            inner.add(kind, handler);
        }
    }

    /// Removes the registration that is the same `Arc` as `handler`.
    pub fn unsubscribe(&self, kind: EventKind, handler: &Handler) {
        let reentrant = self.dispatching();
        let mut inner = self.lock();
        if reentrant {
            inner
                .deferred
                .push(Deferred::Unsubscribe(kind, Arc::clone(handler)));
        } else {
            inner.remove(kind, handler);
        }
    }

    pub fn publish(&self, event: TrackingEvent) {
        let kind = event.kind();
        let snapshot: Vec<Handler> = {
            let inner = self.lock();
            let Some(list) = inner.handlers.get(&kind) else {
                debug!(?kind, "event published with no handlers");
                return;
            };
            list.clone()
        };

        let id = self.id();
        DISPATCHING.with(|stack| stack.borrow_mut().push(id));
        for handler in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(?kind, "event handler panicked");
            }
        }
        let outermost = DISPATCHING.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.pop();
            !stack.contains(&id)
        });

        if outermost {
            let mut inner = self.lock();
            let deferred = std::mem::take(&mut inner.deferred);
            for op in deferred {
                match op {
                    Deferred::Subscribe(kind, handler) => inner.add(kind, handler),
                    Deferred::Unsubscribe(kind, handler) => inner.remove(kind, &handler),
                }
            }
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().handlers.get(&kind).map_or(0, Vec::len)
    }

    fn id(&self) -> usize {
        self as *const Self as usize
    }

    fn dispatching(&self) -> bool {
        let id = self.id();
        DISPATCHING.with(|stack| stack.borrow().contains(&id))
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
