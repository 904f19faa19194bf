//! Exponential backoff with jitter, bounded by `max_attempts` and a saga
//! deadline — spec.md §5 ("recommended: base 100ms, factor 2, cap 5s,
//! jitter +/-20%"). Grounded in the retry-loop shape the pack uses for
//! external HTTP calls (e.g. the Polymarket scraper's
//! `execute_with_retry`), generalized to operate over any step executor
//! result rather than an HTTP response.
//!
//! Deadline checks go through the injected `Clock` rather than `Utc::now()`
//! directly, so `saga-testkit::TestClock` can hold wall-clock time fixed
//! while still driving a saga's deadline to expiry deterministically.

use chrono::DateTime;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use saga_schemas::Clock;

use crate::config::SagaConfig;

/// Runs `attempt` up to `config.max_attempts` times, each wrapped in
/// `config.per_attempt_timeout`, sleeping an exponentially-growing jittered
/// backoff between tries. Stops early — without exhausting attempts — once
/// `deadline` has passed, returning the last observed error.
///
/// `attempt` returns `Result<T, anyhow::Error>`: `Ok` ends the loop
/// immediately, `Err` triggers a retry (or exhaustion if this was the last
/// allowed attempt or the deadline has passed).
pub async fn retry_until<T, F, Fut>(
    config: &SagaConfig,
    clock: &Arc<dyn Clock>,
    deadline: DateTime<chrono::Utc>,
    mut attempt: F,
) -> Result<T, anyhow::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let mut delay = config.backoff_base;
    let mut last_err = None;

    for attempt_no in 0..config.max_attempts {
        if clock.now() >= deadline {
            break;
        }

        match tokio::time::timeout(config.per_attempt_timeout, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => last_err = Some(anyhow::anyhow!("step call timed out after {:?}", config.per_attempt_timeout)),
        }

        let is_last = attempt_no + 1 == config.max_attempts;
        if is_last || clock.now() >= deadline {
            break;
        }

        tokio::time::sleep(jittered(delay, config.jitter_ratio)).await;
        let next_ms = delay.as_secs_f64() * config.backoff_factor * 1000.0;
        delay = Duration::from_millis(next_ms as u64).min(config.backoff_cap);
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("retry loop exited with no attempts made")))
}

fn jittered(base: Duration, ratio: f64) -> Duration {
    let base_ms = base.as_millis() as f64;
    let spread = base_ms * ratio;
    let delta = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis((base_ms + delta).max(0.0) as u64)
}
