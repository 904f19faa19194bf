//! Axum router and HTTP handlers for saga-daemon — spec.md §6's external
//! interfaces (`CreateOrder`, `GetOrder`, the administrative breaker
//! surface) plus a best-effort SSE feed of outbound notification envelopes.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly, matching `mqk-daemon::routes`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use saga_idempotency::IdempotencyError;
use saga_orchestrator::CreateOrderError;
use saga_schemas::{CreateOrderCommand, NotificationEnvelope, ValidationError};

use crate::api_types::{BreakerStateResponse, ErrorResponse, HealthResponse};
use crate::state::AppState;

/// The only breaker this workspace ships (spec.md §4.E's payment call path);
/// named explicitly rather than discovered, since the admin surface is
/// deliberately minimal (spec.md §6: "No other runtime configuration is
/// exposed").
const PAYMENT_BREAKER_NAME: &str = "external-payment-provider";

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/:order_id", get(get_order))
        .route("/v1/notifications/stream", get(notifications_stream))
        .route("/v1/admin/breakers/:name", get(breaker_state))
        .route("/v1/admin/breakers/:name/force-open", post(breaker_force_open))
        .route("/v1/admin/breakers/:name/reset", post(breaker_reset))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/orders — spec.md §6 "Inbound command"
// ---------------------------------------------------------------------------

pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    Json(command): Json<CreateOrderCommand>,
) -> Response {
    match st.orchestrator.create_order(command).await {
        Ok(response) => (StatusCode::ACCEPTED, Json(response)).into_response(),
        Err(CreateOrderError::Validation(ValidationError::MissingIdempotencyKey)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                "MissingIdempotencyKey",
                "idempotency_key is required",
            )),
        )
            .into_response(),
        Err(CreateOrderError::Validation(ValidationError::Invalid(msg))) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("ValidationError", msg)),
        )
            .into_response(),
        Err(CreateOrderError::Idempotency(IdempotencyError::InProgress)) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(
                "InProgress",
                "a request with this idempotency_key is already in flight; retry later",
            )),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("InfrastructureError", e.to_string())),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/orders/:order_id — spec.md §6 "Inbound query"
// ---------------------------------------------------------------------------

pub(crate) async fn get_order(State(st): State<Arc<AppState>>, Path(order_id): Path<String>) -> Response {
    match st.orchestrator.get_order(&order_id).await {
        Ok(Some(view)) => (StatusCode::OK, Json(view)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("NotFound", format!("no order {order_id}"))),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("InfrastructureError", e.to_string())),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/notifications/stream — SSE feed of outbound notification envelopes
// ---------------------------------------------------------------------------

pub(crate) async fn notifications_stream(State(st): State<Arc<AppState>>) -> Response {
    let rx = st.bus.subscribe();
    Sse::new(broadcast_to_sse(rx))
        .keep_alive(KeepAlive::new())
        .into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<NotificationEnvelope>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(envelope) => {
                let data = serde_json::to_string(&envelope).ok()?;
                Some(Ok(Event::default().event("notification").data(data)))
            }
            // Lagged or closed — drop rather than terminate the stream;
            // notifications are at-least-once and non-critical (spec.md §1).
            Err(_) => None,
        }
    })
}

// ---------------------------------------------------------------------------
// Administrative breaker surface — spec.md §6 "Force a breaker OPEN or
// CLOSED by name (for drills and failovers). No other runtime configuration
// is exposed."
// ---------------------------------------------------------------------------

pub(crate) async fn breaker_state(State(st): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if name != PAYMENT_BREAKER_NAME {
        return unknown_breaker(&name);
    }
    match st.orchestrator.payment_breaker().state().await {
        Ok(circuit_state) => (
            StatusCode::OK,
            Json(BreakerStateResponse { name, circuit_state }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("InfrastructureError", e.to_string())),
        )
            .into_response(),
    }
}

pub(crate) async fn breaker_force_open(State(st): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if name != PAYMENT_BREAKER_NAME {
        return unknown_breaker(&name);
    }
    match st.orchestrator.payment_breaker().force_open().await {
        Ok(()) => {
            tracing::warn!(breaker = %name, "operator forced circuit open");
            (StatusCode::OK, Json(ErrorResponse::new("Ok", "forced open"))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("InfrastructureError", e.to_string())),
        )
            .into_response(),
    }
}

pub(crate) async fn breaker_reset(State(st): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if name != PAYMENT_BREAKER_NAME {
        return unknown_breaker(&name);
    }
    match st.orchestrator.payment_breaker().reset().await {
        Ok(()) => {
            tracing::info!(breaker = %name, "operator reset circuit to closed");
            (StatusCode::OK, Json(ErrorResponse::new("Ok", "reset to closed"))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("InfrastructureError", e.to_string())),
        )
            .into_response(),
    }
}

fn unknown_breaker(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("NotFound", format!("no breaker named {name}"))),
    )
        .into_response()
}
