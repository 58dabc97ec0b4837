pub mod frame;
pub mod memory;
pub mod notify;
pub mod rest;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::frame::Frame;
use crate::error::TrackingError;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Up,
    /// The connection dropped; the transport may still be retrying.
    Down(String),
    Frame(Frame),
    /// Inbound text that is not a `{event, data}` frame.
    Malformed(String),
}

/// An open connection. Dropping `outbound` closes it; `inbound` ends once the
/// transport has given up or been closed.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the first connection attempt has succeeded or failed.
    async fn open(&self, endpoint: &str) -> Result<TransportLink, TrackingError>;
}
