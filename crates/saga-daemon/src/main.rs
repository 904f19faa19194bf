//! saga-daemon entry point.
//!
//! Thin by design, matching `mqk-daemon::main`: build the shared
//! `SagaConfig` from environment variables (the *only* place this workspace
//! reads `std::env::var`, per spec.md §9's "per-module runtime-configured
//! environment strings" REDESIGN FLAGS item), wire the store/breaker/
//! provider/bus, construct the `Orchestrator`, and start the HTTP server.
//! All route handlers live in `routes.rs`; all shared state lives in
//! `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use saga_breaker::BreakerConfig;
use saga_daemon::{routes, state};
use saga_orchestrator::{Orchestrator, SagaConfig};
use saga_schemas::{Clock, SystemClock};
use saga_steps::{InMemoryBus, PaymentProvider, SimulatedPaymentProvider};
use saga_store::{KeyedStore, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly. Silent if
    // absent, matching mqk-daemon's PATCH S1.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = build_store(&clock).await?;
    let provider: Arc<dyn PaymentProvider> = Arc::new(SimulatedPaymentProvider::default());
    let bus = Arc::new(InMemoryBus::default());
    let config = config_from_env();

    let orchestrator = Orchestrator::new(
        store,
        clock,
        provider,
        {
            let bus: Arc<dyn saga_steps::NotificationBus> = bus.clone();
            bus
        },
        config,
    );

    let shared = Arc::new(state::AppState::new(orchestrator, bus));

    let app = routes::build_router(shared).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );
    let app = app.layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8900)));
    info!("saga-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

/// `SAGA_DATABASE_URL` selects the Postgres-backed `KeyedStore`; its
/// absence falls back to the in-memory store, suitable for local/paper
/// operation and demos — never for production (single-process state only).
async fn build_store(clock: &Arc<dyn Clock>) -> anyhow::Result<Arc<dyn KeyedStore>> {
    match std::env::var(saga_store::postgres::ENV_DB_URL) {
        Ok(_) => {
            let pool = saga_store::postgres::connect_from_env().await?;
            saga_store::postgres::migrate(&pool).await?;
            info!("saga-daemon using Postgres-backed store");
            Ok(Arc::new(saga_store::PostgresStore::new(pool)))
        }
        Err(_) => {
            info!("SAGA_DATABASE_URL not set; using in-memory store (not for production)");
            Ok(Arc::new(MemoryStore::new(clock.clone())))
        }
    }
}

fn config_from_env() -> SagaConfig {
    let default = SagaConfig::default();
    SagaConfig {
        max_attempts: env_u32("SAGA_MAX_ATTEMPTS").unwrap_or(default.max_attempts),
        saga_deadline: env_secs("SAGA_DEADLINE_SECS").unwrap_or(default.saga_deadline),
        idempotency_ttl: env_secs("SAGA_IDEMPOTENCY_TTL_SECS").unwrap_or(default.idempotency_ttl),
        payment_breaker: BreakerConfig {
            failure_threshold: env_u32("SAGA_BREAKER_FAILURE_THRESHOLD")
                .unwrap_or(default.payment_breaker.failure_threshold),
            success_threshold: env_u32("SAGA_BREAKER_SUCCESS_THRESHOLD")
                .unwrap_or(default.payment_breaker.success_threshold),
            timeout_seconds: env_i64("SAGA_BREAKER_TIMEOUT_SECS")
                .unwrap_or(default.payment_breaker.timeout_seconds),
        },
        ..default
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name).ok()?.parse::<u64>().ok().map(Duration::from_secs)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("SAGA_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins, matching `mqk-daemon`'s policy.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
