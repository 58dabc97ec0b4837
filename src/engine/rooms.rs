use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::api::frame::Frame;
use crate::engine::connection::ConnectionManager;
use crate::models::order::OrderId;

/// Reference-counted per-order room membership on the shared connection.
pub struct RoomMembership {
    connection: Arc<ConnectionManager>,
    members: Mutex<HashMap<OrderId, usize>>,
}

impl RoomMembership {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `false` if the join was dropped because the connection is down.
    pub fn join(&self, order_id: &OrderId) -> bool {
        if !self.connection.is_connected() {
            debug!(order_id = %order_id, "join dropped while disconnected");
            return false;
        }

        let mut members = self.lock();
        let count = members.get(order_id).copied().unwrap_or(0);
        if count == 0 {
            if !self.connection.emit(Frame::join_order(order_id)) {
                return false;
            }
            info!(order_id = %order_id, "joined order room");
        }
        members.insert(order_id.clone(), count + 1);
        true
    }

    pub fn leave(&self, order_id: &OrderId) {
        let mut members = self.lock();
        let Some(count) = members.get_mut(order_id) else {
            return;
        };

        *count -= 1;
        if *count == 0 {
            members.remove(order_id);
            self.connection.emit(Frame::leave_order(order_id));
            info!(order_id = %order_id, "left order room");
        }
    }

    /// Forgets every room; the server drops them along with the socket.
    pub fn reset(&self) {
        let mut members = self.lock();
        if !members.is_empty() {
            debug!(rooms = members.len(), "room membership reset");
            members.clear();
        }
    }

    pub fn member_count(&self, order_id: &OrderId) -> usize {
        self.lock().get(order_id).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OrderId, usize>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
