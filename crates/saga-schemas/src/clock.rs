//! Explicit clock injection.
//!
//! Generalizes the teacher's preference for constructor-injected tunables
//! (SagaConfig, breaker thresholds) to time itself: components never call
//! `Utc::now()` directly, they hold a `Arc<dyn Clock>` passed in at
//! construction. `saga-testkit::TestClock` gives deterministic tests control
//! over TTL expiry and breaker `resets_at` without sleeping in wall-clock
//! time.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
