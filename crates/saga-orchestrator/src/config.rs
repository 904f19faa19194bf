//! `SagaConfig` — the single explicit configuration record every
//! orchestrator-owned tunable comes from (spec.md §9, "per-module
//! runtime-configured environment strings" REDESIGN FLAGS item). No
//! component reads an environment variable itself; `saga-daemon::main` is
//! the only place `std::env::var` appears, and it builds this struct once at
//! startup.

use std::time::Duration;

use saga_breaker::BreakerConfig;

#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Forward/compensation step retries before treating the failure as
    /// business-level (spec.md §4.E).
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_factor: f64,
    pub backoff_cap: Duration,
    /// +/- fraction of jitter applied to each computed backoff.
    pub jitter_ratio: f64,
    /// Per-attempt timeout for a single step call.
    pub per_attempt_timeout: Duration,
    /// Wall-clock budget for one saga's forward progress (spec.md §5).
    pub saga_deadline: Duration,
    pub idempotency_ttl: Duration,
    /// Breaker parameters for the one breaker this workspace ships —
    /// `external-payment-provider` — rather than a hidden default buried in
    /// `saga-breaker`.
    pub payment_breaker: BreakerConfig,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_factor: 2.0,
            backoff_cap: Duration::from_secs(5),
            jitter_ratio: 0.2,
            per_attempt_timeout: Duration::from_secs(30),
            saga_deadline: Duration::from_secs(300),
            idempotency_ttl: saga_idempotency::DEFAULT_TTL,
            payment_breaker: BreakerConfig {
                failure_threshold: 5,
                success_threshold: 2,
                timeout_seconds: 60,
            },
        }
    }
}
