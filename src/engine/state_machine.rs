use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::TrackingError;
use crate::models::order::{OrderId, OrderStatus, OrderTrackingState, TrackingSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiConfig {
    /// The status the UI displays; stays on the first terminal status reached.
    pub display_status: OrderStatus,
    pub show_map: bool,
    pub show_chat: bool,
    pub terminal: bool,
}

impl UiConfig {
    pub fn derive(state: &OrderTrackingState, latched_terminal: Option<OrderStatus>) -> Self {
        let display_status = latched_terminal.unwrap_or(state.status);
        let delivering = display_status == OrderStatus::OutForDelivery;

        Self {
            display_status,
            show_map: delivering && state.qr_scanned,
            show_chat: delivering && state.chat_enabled,
            terminal: display_status.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFlag {
    QrScanned,
    ChatEnabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub previous: Option<OrderTrackingState>,
    pub current: OrderTrackingState,
    pub ui: UiConfig,
    pub peak: Option<OrderStatus>,
    pub was_terminal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Accepted(Box<Transition>),
    Stale,
}

#[derive(Debug)]
pub struct OrderStateMachine {
    order_id: OrderId,
    current: Option<OrderTrackingState>,
    terminal: Option<OrderStatus>,
    peak: Option<OrderStatus>,
    ui: Option<UiConfig>,
    qr_scanned_at: Option<DateTime<Utc>>,
    chat_enabled_at: Option<DateTime<Utc>>,
}

impl OrderStateMachine {
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            current: None,
            terminal: None,
            peak: None,
            ui: None,
            qr_scanned_at: None,
            chat_enabled_at: None,
        }
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    pub fn state(&self) -> Option<&OrderTrackingState> {
        self.current.as_ref()
    }

    pub fn ui(&self) -> Option<UiConfig> {
        self.ui
    }

    /// Accepts `candidate` iff its `last_updated` is not older than the held
    /// state, or strictly newer once a terminal status has been reached.
    pub fn reconcile(
        &mut self,
        mut candidate: OrderTrackingState,
    ) -> Result<Reconciliation, TrackingError> {
        if candidate.order_id != self.order_id {
            return Err(TrackingError::InvalidCandidate(format!(
                "candidate for order {} reconciled into order {}",
                candidate.order_id, self.order_id
            )));
        }

        if let Some(current) = &self.current {
            let stale = if self.terminal.is_some() {
                candidate.last_updated <= current.last_updated
            } else {
                candidate.last_updated < current.last_updated
            };
            if stale {
                return Ok(Reconciliation::Stale);
            }
        }

        // Flags stamped at or after the candidate were already true when it was taken.
        if self.qr_scanned_at.is_some_and(|at| candidate.last_updated <= at) {
            candidate.qr_scanned = true;
        }
        if self.chat_enabled_at.is_some_and(|at| candidate.last_updated <= at) {
            candidate.chat_enabled = true;
        }

        Ok(Reconciliation::Accepted(Box::new(self.accept(candidate))))
    }

    fn accept(&mut self, candidate: OrderTrackingState) -> Transition {
        let was_terminal = self.terminal.is_some();
        if !was_terminal && candidate.status.is_terminal() {
            self.terminal = Some(candidate.status);
        }

        let peak = self.peak;
        if peak.is_none_or(|peak| peak.rank() < candidate.status.rank()) {
            self.peak = Some(candidate.status);
        }

        let ui = UiConfig::derive(&candidate, self.terminal);
        let previous = self.current.replace(candidate.clone());
        self.ui = Some(ui);

        Transition {
            previous,
            current: candidate,
            ui,
            peak,
            was_terminal,
        }
    }

    pub fn reconcile_snapshot(
        &mut self,
        snapshot: TrackingSnapshot,
    ) -> Result<Reconciliation, TrackingError> {
        let candidate = snapshot.into_candidate(&self.order_id, self.current.as_ref())?;
        self.reconcile(candidate)
    }

    /// Flags keep their own timestamp and never advance `last_updated`. Returns
    /// `None` before the first status; a timestamped flag is still remembered.
    pub fn apply_flag(
        &mut self,
        flag: ServerFlag,
        at: Option<DateTime<Utc>>,
    ) -> Option<Reconciliation> {
        let stamp = at.or_else(|| self.current.as_ref().map(|state| state.last_updated));
        if let Some(stamp) = stamp {
            let seen = match flag {
                ServerFlag::QrScanned => &mut self.qr_scanned_at,
                ServerFlag::ChatEnabled => &mut self.chat_enabled_at,
            };
            *seen = Some(seen.map_or(stamp, |prior| prior.max(stamp)));
        }

        let mut candidate = self.current.clone()?;
        let already = match flag {
            ServerFlag::QrScanned => std::mem::replace(&mut candidate.qr_scanned, true),
            ServerFlag::ChatEnabled => std::mem::replace(&mut candidate.chat_enabled, true),
        };
        if already {
            return Some(Reconciliation::Stale);
        }

        Some(Reconciliation::Accepted(Box::new(self.accept(candidate))))
    }
}
