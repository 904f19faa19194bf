//! Idempotency Registry — spec.md §4.B.
//!
//! Grounds the Claim/Execute/Complete-or-Delete protocol directly in
//! `original_source/services/shared/idempotency.py`'s `@idempotent`
//! decorator, expressed per REDESIGN FLAGS ("Decorator-based idempotency")
//! as an explicit wrapper function taking a key and a first-class thunk
//! rather than an implicit interceptor.
//!
//! TTL is an explicit constructor parameter (spec.md §9 Open Question 1),
//! not an implicit global — `IdempotencyRegistry::new(store, clock, ttl)`.
//! The default of 24h documented here matches
//! `original_source`'s `IDEMPOTENCY_TTL_SECONDS` default, but nothing inside
//! this crate reads an environment variable; the caller (ultimately
//! `saga-daemon::main`, via `SagaConfig`) decides the TTL.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use saga_schemas::Clock;
use saga_store::{KeyedStore, StoreError, IDEMPOTENCY_TABLE, META_SORT};

/// Default orphaned-`IN_FLIGHT` recovery latency: 24 hours. During this
/// window a retry with the same key that finds an orphaned claim (the
/// original executor crashed between claim and completion) fails with
/// `InProgress`; this is documented back-pressure, not a bug (spec.md §9
/// Open Question 1).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    /// Another invocation with this key is currently running (or orphaned
    /// within its TTL window). Callers must back off and retry.
    #[error("idempotency key is already in progress")]
    InProgress,
    /// The stored record was in neither `IN_FLIGHT` nor `COMPLETE` — the
    /// record was deleted so a fresh attempt can proceed; the caller should
    /// retry immediately with the same key.
    #[error("invalid idempotency record state: {0}")]
    InvalidState(String),
    #[error("idempotency store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to deserialize cached idempotent result: {0}")]
    Deserialize(#[from] serde_json::Error),
}

pub struct IdempotencyRegistry {
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl IdempotencyRegistry {
    pub fn new(store: Arc<dyn KeyedStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Execute `f` at most once per `key` within the record's TTL.
    ///
    /// `T` round-trips through `serde_json::Value`. `serde_json::Map` is a
    /// `BTreeMap` by default (this workspace never enables the
    /// `preserve_order` feature), so object keys are always serialized in
    /// sorted order — the canonical encoding spec.md §4.B requires so that
    /// two executions of the same logical call produce byte-equal cached
    /// results.
    pub async fn execute<T, F, Fut>(&self, key: &str, f: F) -> Result<T, IdempotencyError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());

        let claim = self
            .store
            .put_if_absent(
                IDEMPOTENCY_TABLE,
                key,
                META_SORT,
                json!({
                    "status": "IN_FLIGHT",
                    "created_at": now,
                    "expires_at": expires_at,
                }),
            )
            .await;

        let claim = match claim {
            Ok(item) => item,
            Err(StoreError::PreconditionFailed) => {
                let existing = self.store.get(IDEMPOTENCY_TABLE, key, META_SORT).await?;
                return match existing {
                    Some(item) => match item.attributes.get("status").and_then(|v| v.as_str()) {
                        Some("COMPLETE") => {
                            let result = item
                                .attributes
                                .get("result")
                                .cloned()
                                .unwrap_or(serde_json::Value::Null);
                            Ok(serde_json::from_value(result)?)
                        }
                        Some("IN_FLIGHT") => Err(IdempotencyError::InProgress),
                        other => {
                            let state = other.unwrap_or("<missing>").to_string();
                            self.store.delete(IDEMPOTENCY_TABLE, key, META_SORT).await?;
                            Err(IdempotencyError::InvalidState(state))
                        }
                    },
                    // Raced with TTL eviction between the failed claim and
                    // this read — treat as in-flight-adjacent and ask the
                    // caller to retry rather than silently re-running `f`
                    // twice for the same external effect.
                    None => Err(IdempotencyError::InProgress),
                };
            }
            Err(e) => return Err(e.into()),
        };

        match f().await {
            Ok(result) => {
                let canonical = serde_json::to_value(&result)?;
                self.store
                    .put_if_version(
                        IDEMPOTENCY_TABLE,
                        key,
                        META_SORT,
                        json!({
                            "status": "COMPLETE",
                            "result": canonical,
                            "created_at": now,
                            "expires_at": expires_at,
                        }),
                        claim.version,
                    )
                    .await?;
                Ok(result)
            }
            Err(e) => {
                // Clear the claim so a retry with the same key can proceed —
                // the only recovery path that doesn't require a separate
                // sweep (spec.md §4.B rationale).
                self.store.delete(IDEMPOTENCY_TABLE, key, META_SORT).await?;
                Err(anyhow_to_idempotency_error(e))
            }
        }
    }
}

/// `f`'s infrastructure errors are not part of this crate's typed taxonomy —
/// they're re-wrapped so `IdempotencyError` stays an `anyhow`-compatible
/// `std::error::Error`, and the orchestrator's retry loop still sees the
/// original error via `Display`/`source`.
fn anyhow_to_idempotency_error(e: anyhow::Error) -> IdempotencyError {
    IdempotencyError::InvalidState(format!("thunk failed: {e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_schemas::SystemClock;
    use saga_store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn registry() -> IdempotencyRegistry {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new(clock.clone()));
        IdempotencyRegistry::new(store, clock, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn same_key_runs_thunk_once() {
        let reg = registry();
        let calls = Arc::new(AtomicU32::new(0));

        let run = |calls: Arc<AtomicU32>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(42u32)
        };

        let r1 = reg.execute("k1", || run(calls.clone())).await.unwrap();
        let r2 = reg.execute("k1", || run(calls.clone())).await.unwrap();

        assert_eq!(r1, 42);
        assert_eq!(r2, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicate_returns_in_progress() {
        let reg = Arc::new(registry());

        // Claim the key directly, simulating an in-flight peer execution.
        reg.store
            .put_if_absent(
                IDEMPOTENCY_TABLE,
                "k2",
                META_SORT,
                json!({"status": "IN_FLIGHT"}),
            )
            .await
            .unwrap();

        let err = reg
            .execute("k2", || async { Ok::<_, anyhow::Error>(1u32) })
            .await
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::InProgress));
    }

    #[tokio::test]
    async fn failed_thunk_clears_claim_for_retry() {
        let reg = registry();

        let err = reg
            .execute("k3", || async { anyhow::bail!("boom") })
            .await
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidState(_)));

        // The claim was deleted, so a fresh attempt is allowed through.
        let r = reg
            .execute("k3", || async { Ok::<_, anyhow::Error>(7u32) })
            .await
            .unwrap();
        assert_eq!(r, 7);
    }
}
