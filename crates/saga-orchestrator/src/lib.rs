//! The order-placement saga orchestrator (spec.md §4.E).
//!
//! Wires `saga-steps` executors, the `saga-breaker` circuit breaker and the
//! `saga-idempotency` registry together behind one `Orchestrator` that drives
//! an order from `PENDING` to `CONFIRMED` or `FAILED`.

mod config;
mod context;
mod engine;
mod retry;

pub use config::SagaConfig;
pub use context::SagaContext;
pub use engine::{CreateOrderError, Orchestrator};
pub use retry::retry_until;
