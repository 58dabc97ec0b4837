use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::frame::Frame;
use crate::api::{LinkEvent, Transport, TransportLink};
use crate::error::TrackingError;

/// In-process [`Transport`] whose far end is handed out as a [`MemoryPeer`].
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    buffer: usize,
}

/// The server side of one opened [`MemoryTransport`] link.
pub struct MemoryPeer {
    pub endpoint: String,
    sent: mpsc::Receiver<Frame>,
    events: mpsc::Sender<LinkEvent>,
}

impl MemoryTransport {
    pub fn new(buffer: usize) -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: AtomicBool::new(false),
                buffer: buffer.max(1),
            },
            peers_rx,
        )
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, endpoint: &str) -> Result<TransportLink, TrackingError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TrackingError::Connect {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }

        let (outbound, sent) = mpsc::channel(self.buffer);
        let (events, inbound) = mpsc::channel(self.buffer);

        self.peers
            .send(MemoryPeer {
                endpoint: endpoint.to_string(),
                sent,
                events,
            })
            .map_err(|_| TrackingError::Transport("memory transport peer receiver dropped".to_string()))?;

        Ok(TransportLink { outbound, inbound })
    }
}

impl MemoryPeer {
    pub async fn push(&self, frame: Frame) -> bool {
        self.events.send(LinkEvent::Frame(frame)).await.is_ok()
    }

    pub async fn push_malformed(&self, reason: &str) -> bool {
        self.events
            .send(LinkEvent::Malformed(reason.to_string()))
            .await
            .is_ok()
    }

    pub async fn drop_link(&self, reason: &str) -> bool {
        self.events
            .send(LinkEvent::Down(reason.to_string()))
            .await
            .is_ok()
    }

    pub async fn restore_link(&self) -> bool {
        self.events.send(LinkEvent::Up).await.is_ok()
    }

    pub fn try_next_sent(&mut self) -> Option<Frame> {
        self.sent.try_recv().ok()
    }

    pub async fn next_sent(&mut self) -> Option<Frame> {
        self.sent.recv().await
    }

    pub fn drain_sent(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// True once the client has closed its side of the link.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
