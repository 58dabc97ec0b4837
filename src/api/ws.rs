use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::api::frame::Frame;
use crate::api::{LinkEvent, Transport, TransportLink};
use crate::config::ReconnectPolicy;
use crate::error::TrackingError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INBOUND_BUFFER_SIZE: usize = 256;

/// JSON-over-WebSocket transport with exponential-backoff reconnects.
#[derive(Debug, Clone)]
pub struct WsTransport {
    policy: ReconnectPolicy,
    outbound_buffer_size: usize,
}

impl WsTransport {
    pub fn new(policy: ReconnectPolicy, outbound_buffer_size: usize) -> Self {
        Self {
            policy,
            outbound_buffer_size: outbound_buffer_size.max(1),
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default(), 64)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &str) -> Result<TransportLink, TrackingError> {
        url::Url::parse(endpoint)?;
        let socket = dial(endpoint).await?;

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_buffer_size);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER_SIZE);

        tokio::spawn(pump(
            socket,
            endpoint.to_string(),
            self.policy.clone(),
            outbound_rx,
            inbound_tx,
        ));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn dial(endpoint: &str) -> Result<Socket, TrackingError> {
    let (socket, _response) =
        connect_async(endpoint)
            .await
            .map_err(|err| TrackingError::Connect {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            })?;
    Ok(socket)
}

enum SessionEnd {
    ClosedByClient,
    Dropped(String),
}

async fn pump(
    mut socket: Socket,
    endpoint: String,
    policy: ReconnectPolicy,
    mut outbound_rx: mpsc::Receiver<Frame>,
    inbound_tx: mpsc::Sender<LinkEvent>,
) {
    loop {
        let reason = match run_session(socket, &mut outbound_rx, &inbound_tx).await {
            SessionEnd::ClosedByClient => {
                debug!(endpoint = %endpoint, "websocket closed by client");
                return;
            }
            SessionEnd::Dropped(reason) => reason,
        };

        warn!(endpoint = %endpoint, reason = %reason, "websocket dropped");
        if inbound_tx.send(LinkEvent::Down(reason)).await.is_err() {
            return;
        }

        match reconnect(&endpoint, &policy, &mut outbound_rx).await {
            Some(fresh) => {
                socket = fresh;
                info!(endpoint = %endpoint, "websocket reconnected");
                if inbound_tx.send(LinkEvent::Up).await.is_err() {
                    return;
                }
            }
            None => return,
        }
    }
}

async fn run_session(
    socket: Socket,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    inbound_tx: &mpsc::Sender<LinkEvent>,
) -> SessionEnd {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return SessionEnd::ClosedByClient;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, event = %frame.event, "failed to serialize outbound frame");
                        continue;
                    }
                };
                if let Err(err) = write.send(WsMessage::Text(text.into())).await {
                    return SessionEnd::Dropped(err.to_string());
                }
            }
            incoming = read.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text.to_string(),
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("ignoring non-utf8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) => {
                        return SessionEnd::Dropped("closed by server".to_string());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return SessionEnd::Dropped(err.to_string()),
                    None => return SessionEnd::Dropped("stream ended".to_string()),
                };

                let event = match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => LinkEvent::Frame(frame),
                    Err(err) => {
                        debug!(error = %err, bytes = text.len(), "unparseable inbound frame");
                        LinkEvent::Malformed(err.to_string())
                    }
                };
                if inbound_tx.send(event).await.is_err() {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return SessionEnd::ClosedByClient;
                }
            }
        }
    }
}

/// Retries until connected, the policy is exhausted, or the client closes.
async fn reconnect(
    endpoint: &str,
    policy: &ReconnectPolicy,
    outbound_rx: &mut mpsc::Receiver<Frame>,
) -> Option<Socket> {
    let mut attempt = 0;

    loop {
        if policy.exhausted(attempt) {
            warn!(endpoint = %endpoint, attempts = attempt, "giving up on reconnect");
            return None;
        }

        let delay = tokio::time::sleep(policy.delay_for(attempt));
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                outbound = outbound_rx.recv() => match outbound {
                    Some(frame) => {
                        debug!(event = %frame.event, "dropping frame while reconnecting");
                    }
                    None => return None,
                },
            }
        }

        attempt += 1;
        match dial(endpoint).await {
            Ok(socket) => return Some(socket),
            Err(err) => {
                debug!(endpoint = %endpoint, attempt, error = %err, "reconnect attempt failed");
            }
        }
    }
}
