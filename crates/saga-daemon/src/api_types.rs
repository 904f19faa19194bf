//! Request/response types for the saga-daemon HTTP surface (spec.md §6).
//!
//! No business logic lives here — these are the wire shapes `routes.rs`
//! serializes/deserializes at the boundary.

use serde::{Deserialize, Serialize};

use saga_schemas::CircuitState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// Body returned for every validation/idempotency/not-found error the API
/// surfaces — spec.md §7's taxonomy, crossed over the boundary as data
/// rather than as an opaque 500.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

impl ErrorResponse {
    pub fn new(kind: &str, error: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            error: error.into(),
        }
    }
}

/// Administrative breaker read/force endpoints (spec.md §6 "Force a breaker
/// OPEN or CLOSED by name").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStateResponse {
    pub name: String,
    pub circuit_state: CircuitState,
}
