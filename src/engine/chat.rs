use std::collections::HashSet;

use crate::error::TrackingError;
use crate::models::chat::{ChatMessage, DeliveryState};
use crate::models::order::OrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Appended,
    /// Server echo of a message we sent.
    Confirmed,
    Duplicate,
}

/// Append-only transcript for one order, ordered by timestamp.
#[derive(Debug)]
pub struct ChatStream {
    order_id: OrderId,
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
}

impl ChatStream {
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            messages: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Optimistic echo of a locally composed message.
    pub fn push_local(&mut self, message: ChatMessage) -> Result<(), TrackingError> {
        self.check(&message)?;
        if self.seen.insert(message.id.clone()) {
            self.insert_ordered(message);
        }
        Ok(())
    }

    pub fn receive(&mut self, mut message: ChatMessage) -> Result<Receipt, TrackingError> {
        self.check(&message)?;

        if !self.seen.insert(message.id.clone()) {
            let confirmed = self.mark_if(&message.id, DeliveryState::Confirmed, |state| {
                matches!(
                    state,
                    DeliveryState::Pending | DeliveryState::Forwarded | DeliveryState::Dropped
                )
            });
            return Ok(if confirmed {
                Receipt::Confirmed
            } else {
                Receipt::Duplicate
            });
        }

        message.delivery = DeliveryState::Received;
        self.insert_ordered(message);
        Ok(Receipt::Appended)
    }

    pub fn mark(&mut self, id: &str, delivery: DeliveryState) -> bool {
        self.mark_if(id, delivery, |_| true)
    }

    fn mark_if<F>(&mut self, id: &str, delivery: DeliveryState, allowed: F) -> bool
    where
        F: Fn(DeliveryState) -> bool,
    {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) if allowed(message.delivery) => {
                message.delivery = delivery;
                true
            }
            _ => false,
        }
    }

    fn check(&self, message: &ChatMessage) -> Result<(), TrackingError> {
        if message.order_id != self.order_id {
            return Err(TrackingError::InvalidMessage(format!(
                "message for order {} delivered to order {}",
                message.order_id, self.order_id
            )));
        }
        message.validate()
    }

    // Equal timestamps keep arrival order.
    fn insert_ordered(&mut self, message: ChatMessage) {
        let index = self
            .messages
            .partition_point(|existing| existing.timestamp <= message.timestamp);
        self.messages.insert(index, message);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{ChatStream, Receipt};
    use crate::models::chat::{ChatMessage, ChatSender, DeliveryState};
    use crate::models::order::OrderId;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn remote(id: &str, text: &str, ms: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            order_id: OrderId::new("ord-1").unwrap(),
            text: text.to_string(),
            sender: ChatSender::Driver,
            timestamp: at(ms),
            delivery: DeliveryState::Received,
        }
    }

    fn stream() -> ChatStream {
        ChatStream::new(OrderId::new("ord-1").unwrap())
    }

    fn texts(stream: &ChatStream) -> Vec<&str> {
        stream.messages().iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let mut stream = stream();
        assert_eq!(stream.receive(remote("m-1", "hi", 10)).unwrap(), Receipt::Appended);
        assert_eq!(stream.receive(remote("m-1", "hi", 10)).unwrap(), Receipt::Duplicate);
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn messages_are_ordered_by_timestamp() {
        let mut stream = stream();
        stream.receive(remote("m-2", "second", 20)).unwrap();
        stream.receive(remote("m-3", "third", 30)).unwrap();
        stream.receive(remote("m-1", "first", 10)).unwrap();

        assert_eq!(texts(&stream), vec!["first", "second", "third"]);
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut stream = stream();
        stream.receive(remote("m-a", "a", 10)).unwrap();
        stream.receive(remote("m-b", "b", 10)).unwrap();
        stream.receive(remote("m-c", "c", 10)).unwrap();

        assert_eq!(texts(&stream), vec!["a", "b", "c"]);
    }

    #[test]
    fn local_echo_is_visible_and_confirmed_by_server_echo() {
        let mut stream = stream();
        let local = ChatMessage::outgoing(OrderId::new("ord-1").unwrap(), "on my way down").unwrap();
        let id = local.id.clone();
        stream.push_local(local.clone()).unwrap();
        stream.mark(&id, DeliveryState::Forwarded);

        assert_eq!(texts(&stream), vec!["on my way down"]);
        assert_eq!(stream.receive(local).unwrap(), Receipt::Confirmed);
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.messages()[0].delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn message_for_another_order_is_rejected() {
        let mut stream = stream();
        let mut foreign = remote("m-1", "wrong room", 10);
        foreign.order_id = OrderId::new("ord-2").unwrap();

        assert!(stream.receive(foreign).is_err());
        assert!(stream.is_empty());
    }

    #[test]
    fn invalid_remote_text_is_rejected() {
        let mut stream = stream();
        assert!(stream.receive(remote("m-1", "", 10)).is_err());
        assert!(stream.receive(remote("", "no id", 10)).is_err());
        assert!(stream.is_empty());
    }
}
