//! Shared runtime state for saga-daemon.
//!
//! Mirrors `mqk-daemon::state::AppState`: a single `Clone`-via-`Arc` struct
//! handed to every Axum handler through `State<Arc<AppState>>`. This module
//! owns nothing async itself beyond the handle.

use saga_orchestrator::Orchestrator;
use saga_steps::InMemoryBus;
use std::sync::Arc;

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Kept as the concrete type (rather than only the `dyn NotificationBus`
    /// handed to the orchestrator) so handlers can `subscribe()` for the SSE
    /// notification stream — the orchestrator only needs to publish.
    pub bus: Arc<InMemoryBus>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, bus: Arc<InMemoryBus>) -> Self {
        Self {
            orchestrator,
            bus,
            build: BuildInfo {
                service: "saga-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
