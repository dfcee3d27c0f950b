//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, Arc<api::routes::orders::AppState<InMemoryEventStore>>) {
    let store = InMemoryEventStore::new();
    let state = api::create_state(store);
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn create_order_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/orders")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn health_check() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn create_order_returns_durable_acceptance() {
    let (app, state) = setup();

    let response = app
        .oneshot(create_order_request(serde_json::json!({
            "from_amount": 1000.0,
            "from_currency": "USDT",
            "to_currency": "BTC",
            "order_type": "market",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "pending");

    // The OrderAccepted event is committed before the response.
    let order_id: common::AggregateId = json["order_id"].as_str().unwrap().parse().unwrap();
    use event_store::EventStore;
    let stream = state.event_store.load(order_id).await.unwrap();
    assert_eq!(stream.len(), 1);
    assert_eq!(stream[0].event_type, "OrderAccepted");
}

#[tokio::test]
async fn create_order_below_minimum_is_rejected() {
    let (app, _) = setup();

    let response = app
        .oneshot(create_order_request(serde_json::json!({
            "from_amount": 5.0,
            "from_currency": "USDT",
            "to_currency": "BTC",
            "order_type": "market",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("minimum"));
}

#[tokio::test]
async fn create_order_with_unknown_type_is_rejected() {
    let (app, _) = setup();

    let response = app
        .oneshot(create_order_request(serde_json::json!({
            "from_amount": 1000.0,
            "from_currency": "USDT",
            "to_currency": "BTC",
            "order_type": "stop",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_order_returns_replayed_state() {
    let (app, _) = setup();

    let created = app
        .clone()
        .oneshot(create_order_request(serde_json::json!({
            "from_amount": 1000.0,
            "from_currency": "USDT",
            "to_currency": "BTC",
            "order_type": "market",
        })))
        .await
        .unwrap();
    let order_id = body_json(created).await["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/orders/{order_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], order_id);
    assert_eq!(json["from_amount"], 1000.0);
    assert_eq!(json["status"], "pending");
    assert_eq!(json["order_type"], "market");
    assert_eq!(json["version"], 1);
}

#[tokio::test]
async fn get_missing_order_is_not_found() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/orders/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_events_expose_audit_timeline() {
    let (app, _) = setup();

    let created = app
        .clone()
        .oneshot(create_order_request(serde_json::json!({
            "from_amount": 1000.0,
            "from_currency": "USDT",
            "to_currency": "BTC",
            "order_type": "market",
        })))
        .await
        .unwrap();
    let order_id = body_json(created).await["order_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/orders/{order_id}/events"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let events = json.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_type"], "OrderAccepted");
    assert_eq!(events[0]["version"], 1);
    assert_eq!(events[0]["aggregate_type"], "Order");
}

#[tokio::test]
async fn invalid_order_id_is_bad_request() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/orders/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
