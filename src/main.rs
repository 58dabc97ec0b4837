use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use order_tracking::{Config, OrderTracker, TrackingError, TrackingView};

#[tokio::main]
async fn main() -> Result<(), TrackingError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let order_id = env::args()
        .nth(1)
        .or_else(|| config.track_order_id.clone())
        .ok_or_else(|| {
            TrackingError::Config("usage: order-tracker <order-id> (or set TRACK_ORDER_ID)".to_string())
        })?;

    let tracker = OrderTracker::from_config(config)?;
    tracker.connect().await;

    let mut handle = tracker.subscribe(&order_id)?;
    let mut updates = handle.updates();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!(order_id = %order_id, "tracking order; type a line to message the driver");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            update = updates.next() => match update {
                Some(view) => log_view(&view),
                None => {
                    tracing::warn!(order_id = %order_id, "tracking session closed");
                    break;
                }
            },
            line = lines.next_line() => match line {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    if let Err(err) = tracker.send_message(&order_id, &text) {
                        tracing::warn!(error = %err, "message not sent");
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!("stdin closed; waiting for ctrl-c");
                    (&mut shutdown).await;
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to read stdin");
                    break;
                }
            },
        }
    }

    handle.unsubscribe();
    tracker.disconnect();

    match tracker.metrics().encode() {
        Ok(body) => tracing::debug!("final metrics:\n{body}"),
        Err(err) => tracing::warn!(error = %err, "failed to encode metrics"),
    }
    tracing::info!("tracker stopped");

    Ok(())
}

fn log_view(view: &TrackingView) {
    let Some(state) = &view.state else {
        tracing::info!(order_id = %view.order_id, connection = ?view.connection, "waiting for first update");
        return;
    };

    let status = view.ui.map_or(state.status, |ui| ui.display_status);
    let show_map = view.ui.is_some_and(|ui| ui.show_map);
    let show_chat = view.ui.is_some_and(|ui| ui.show_chat);
    let eta = state.estimated_time.as_deref().unwrap_or("-");
    tracing::info!(
        order_id = %view.order_id,
        status = %status,
        show_map,
        show_chat,
        eta,
        messages = view.messages.len(),
        connection = ?view.connection,
        "order updated"
    );

    if let Some(message) = view.messages.last() {
        tracing::debug!(sender = ?message.sender, text = %message.text, "latest message");
    }
    if let Some(error) = &view.last_error {
        tracing::debug!(source = ?error.source, error = %error.message, "last error");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
