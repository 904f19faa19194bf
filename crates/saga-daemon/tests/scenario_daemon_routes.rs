//! In-process scenario tests for saga-daemon's HTTP surface.
//!
//! Drives the router via `tower::ServiceExt::oneshot` without binding a TCP
//! socket, matching `mqk-daemon`'s test style.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use saga_daemon::{routes, state};
use saga_orchestrator::{Orchestrator, SagaConfig};
use saga_schemas::{Clock, SystemClock};
use saga_steps::{InMemoryBus, PaymentProvider, SimulatedPaymentProvider};
use saga_store::{KeyedStore, MemoryStore, INVENTORY_TABLE, META_SORT};

fn test_config() -> SagaConfig {
    SagaConfig {
        max_attempts: 2,
        backoff_base: Duration::from_millis(5),
        backoff_factor: 2.0,
        backoff_cap: Duration::from_millis(20),
        jitter_ratio: 0.1,
        per_attempt_timeout: Duration::from_secs(2),
        saga_deadline: Duration::from_secs(2),
        idempotency_ttl: Duration::from_secs(3600),
        ..SagaConfig::default()
    }
}

fn make_state() -> Arc<state::AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new(clock.clone()));
    let provider: Arc<dyn PaymentProvider> = Arc::new(SimulatedPaymentProvider::default());
    let bus = Arc::new(InMemoryBus::default());
    let dyn_bus: Arc<dyn saga_steps::NotificationBus> = bus.clone();
    let orchestrator = Orchestrator::new(store, clock, provider, dyn_bus, test_config());
    Arc::new(state::AppState::new(orchestrator, bus))
}

/// Builds state and returns the raw store alongside it, for tests that need
/// to seed inventory before issuing HTTP requests.
fn make_state_with_store() -> (Arc<state::AppState>, Arc<dyn KeyedStore>) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new(clock.clone()));
    let provider: Arc<dyn PaymentProvider> = Arc::new(SimulatedPaymentProvider::default());
    let bus = Arc::new(InMemoryBus::default());
    let dyn_bus: Arc<dyn saga_steps::NotificationBus> = bus.clone();
    let orchestrator = Orchestrator::new(store.clone(), clock, provider, dyn_bus, test_config());
    (Arc::new(state::AppState::new(orchestrator, bus)), store)
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, serde_json::Value) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp.into_body().collect().await.expect("body collect failed").to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).expect("body is not valid JSON")
    };
    (status, json)
}

#[tokio::test]
async fn health_returns_200() {
    let st = make_state();
    let router = routes::build_router(st);
    let req = Request::builder()
        .method("GET")
        .uri("/v1/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "saga-daemon");
}

#[tokio::test]
async fn create_order_without_idempotency_key_is_rejected() {
    let st = make_state();
    let router = routes::build_router(st);
    let body = serde_json::json!({
        "customer_id": "alice",
        "items": [{"product_id": "LAPTOP-01", "quantity": 1, "unit_price_cents": 100}],
        "idempotency_key": "",
    });
    let req = Request::builder()
        .method("POST")
        .uri("/v1/orders")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "MissingIdempotencyKey");
}

#[tokio::test]
async fn create_order_happy_path_reaches_confirmed() {
    let (st, store) = make_state_with_store();
    store
        .put_if_absent(
            INVENTORY_TABLE,
            "LAPTOP-01",
            META_SORT,
            serde_json::json!({"product_id": "LAPTOP-01", "quantity": 10, "unit_price_cents": 149900, "name": "LAPTOP-01"}),
        )
        .await
        .unwrap();

    let router = routes::build_router(st.clone());
    let body = serde_json::json!({
        "customer_id": "alice",
        "items": [{"product_id": "LAPTOP-01", "quantity": 1, "unit_price_cents": 149900}],
        "idempotency_key": "http-k1",
    });
    let req = Request::builder()
        .method("POST")
        .uri("/v1/orders")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "PENDING");
    let order_id = json["order_id"].as_str().unwrap().to_string();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let router = routes::build_router(st.clone());
        let req = Request::builder()
            .method("GET")
            .uri(format!("/v1/orders/{order_id}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, json) = call(router, req).await;
        assert_eq!(status, StatusCode::OK);
        if json["order"]["status"] == "CONFIRMED" {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "order never confirmed: {json}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn get_unknown_order_returns_404() {
    let st = make_state();
    let router = routes::build_router(st);
    let req = Request::builder()
        .method("GET")
        .uri("/v1/orders/does-not-exist")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = call(router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "NotFound");
}

#[tokio::test]
async fn breaker_admin_force_open_then_reset() {
    let st = make_state();

    let req = Request::builder()
        .method("POST")
        .uri("/v1/admin/breakers/external-payment-provider/force-open")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = call(routes::build_router(st.clone()), req).await;
    assert_eq!(status, StatusCode::OK);

    let req = Request::builder()
        .method("GET")
        .uri("/v1/admin/breakers/external-payment-provider")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = call(routes::build_router(st.clone()), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["circuit_state"], "OPEN");

    let req = Request::builder()
        .method("POST")
        .uri("/v1/admin/breakers/external-payment-provider/reset")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = call(routes::build_router(st.clone()), req).await;
    assert_eq!(status, StatusCode::OK);

    let req = Request::builder()
        .method("GET")
        .uri("/v1/admin/breakers/external-payment-provider")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, json) = call(routes::build_router(st.clone()), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["circuit_state"], "CLOSED");
}

#[tokio::test]
async fn unknown_breaker_name_returns_404() {
    let st = make_state();
    let req = Request::builder()
        .method("GET")
        .uri("/v1/admin/breakers/not-a-real-breaker")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = call(routes::build_router(st), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let st = make_state();
    let req = Request::builder()
        .method("GET")
        .uri("/v1/does-not-exist")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _) = call(routes::build_router(st), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
