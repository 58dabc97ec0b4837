mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::RecordingScheduler;
use order_tracking::api::memory::MemoryTransport;
use order_tracking::api::rest::{OrderFetcher, RestOrderClient};
use order_tracking::models::event::ErrorSource;
use order_tracking::models::order::{OrderId, OrderStatus};
use order_tracking::{Config, OrderTracker, TrackingError};

async fn mock_tracking(server: &MockServer, order_id: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/api/orders/{order_id}/tracking")))
        .respond_with(response)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> RestOrderClient {
    assert_ok!(RestOrderClient::new(
        &format!("{}/api", server.uri()),
        Duration::from_secs(5)
    ))
}

fn tracker_for(server: &MockServer) -> OrderTracker {
    let config = Config {
        api_url: format!("{}/api", server.uri()),
        poll_interval: Duration::from_secs(3_600),
        ..Config::default()
    };
    let (transport, _peers) = MemoryTransport::new(16);

    OrderTracker::new(
        config,
        Arc::new(transport),
        Arc::new(client_for(server)),
        Arc::new(RecordingScheduler::default()),
    )
}

#[tokio::test]
async fn fetch_decodes_tracking_snapshot() {
    let server = MockServer::start().await;
    mock_tracking(
        &server,
        "ord-1",
        ResponseTemplate::new(200).set_body_json(json!({
            "orderId": "ord-1",
            "status": "out_for_delivery",
            "qrScanned": true,
            "driverInfo": { "name": "Sam", "phone": "+15550100" },
            "driverLocation": { "latitude": 52.52, "longitude": 13.405 },
            "estimatedTime": "12 min",
            "lastUpdated": "2026-03-01T18:30:00Z"
        })),
    )
    .await;

    let snapshot = assert_ok!(client_for(&server).fetch(&OrderId::new("ord-1").unwrap()).await);

    assert_eq!(snapshot.status.as_deref(), Some("out_for_delivery"));
    assert_eq!(snapshot.qr_scanned, Some(true));
    assert_eq!(snapshot.driver_info.unwrap().name, "Sam");
    assert_eq!(snapshot.estimated_time.as_deref(), Some("12 min"));
}

#[tokio::test]
async fn server_error_is_retryable_api_error() {
    let server = MockServer::start().await;
    mock_tracking(
        &server,
        "ord-1",
        ResponseTemplate::new(500).set_body_string("database unavailable"),
    )
    .await;

    let err = assert_err!(client_for(&server).fetch(&OrderId::new("ord-1").unwrap()).await);

    match &err {
        TrackingError::Api { status, message } => {
            assert_eq!(*status, 500);
            assert_eq!(message, "database unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn missing_order_is_not_retryable() {
    let server = MockServer::start().await;
    mock_tracking(&server, "ord-404", ResponseTemplate::new(404)).await;

    let err = assert_err!(
        client_for(&server)
            .fetch(&OrderId::new("ord-404").unwrap())
            .await
    );

    assert!(matches!(err, TrackingError::Api { status: 404, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn malformed_body_is_an_error() {
    let server = MockServer::start().await;
    mock_tracking(
        &server,
        "ord-1",
        ResponseTemplate::new(200).set_body_json(json!({ "status": "ready" })),
    )
    .await;

    let err = assert_err!(client_for(&server).fetch(&OrderId::new("ord-1").unwrap()).await);
    assert!(matches!(err, TrackingError::Http(_)));
}

#[tokio::test]
async fn refresh_reconciles_fetched_state() {
    let server = MockServer::start().await;
    mock_tracking(
        &server,
        "ord-1",
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "ready",
            "lastUpdated": "2026-03-01T18:00:00Z"
        })),
    )
    .await;
    let tracker = tracker_for(&server);
    let handle = assert_ok!(tracker.subscribe("ord-1"));

    assert!(assert_ok!(tracker.refresh("ord-1").await));

    let state = handle.current().state.unwrap();
    assert_eq!(state.status, OrderStatus::Ready);
    assert_eq!(state.order_id.as_str(), "ord-1");
}

#[tokio::test]
async fn failing_poll_is_reported_and_state_untouched() {
    let server = MockServer::start().await;
    mock_tracking(&server, "ord-1", ResponseTemplate::new(503)).await;
    let tracker = tracker_for(&server);
    let handle = assert_ok!(tracker.subscribe("ord-1"));

    assert!(!assert_ok!(tracker.refresh("ord-1").await));

    let view = handle.current();
    assert!(view.state.is_none());
    let error = view.last_error.unwrap();
    assert_eq!(error.source, ErrorSource::Poll);
    assert_eq!(error.order_id.unwrap().as_str(), "ord-1");
    assert!(tracker.metrics().polls_total.with_label_values(&["error"]).get() >= 1);
}
