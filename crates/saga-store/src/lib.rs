//! `KeyedStore` — the minimal interface of spec.md §4.A, sufficient for the
//! idempotency registry, circuit breaker, step executors and orchestrator.
//!
//! Generalizes `mqk-db`'s Postgres access layer (pooled connections,
//! `anyhow::Context` at every call site, embedded `sqlx::migrate!`) behind a
//! single trait so the six logical tables named in spec.md §6 (`orders`,
//! `inventory`, `reservations`, `payments`, `idempotency`,
//! `circuit_breakers`) can share one physical backing store: a single
//! Postgres table `kv_store(table_name, partition, sort, version,
//! attributes, expires_at)`, addressed by `(table_name, partition, sort)`.
//! This single-table generalization is documented in `DESIGN.md`; it mirrors
//! `original_source/services/order_service/repository.py`'s DynamoDB
//! single-table design (`pk=ORDER#<id>`, `sk=META|EVENT#<ts>`), extended
//! across all six logical tables instead of just `orders`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

// ---------------------------------------------------------------------------
// Logical table names
// ---------------------------------------------------------------------------

pub const ORDERS_TABLE: &str = "orders";
pub const INVENTORY_TABLE: &str = "inventory";
pub const RESERVATIONS_TABLE: &str = "reservations";
pub const PAYMENTS_TABLE: &str = "payments";
pub const IDEMPOTENCY_TABLE: &str = "idempotency";
pub const CIRCUIT_BREAKERS_TABLE: &str = "circuit_breakers";

/// Sort key used for the single "current state" row of a partition, as
/// opposed to the `EVENT#<seq>` rows appended to an order's event log.
pub const META_SORT: &str = "META";

pub fn event_sort_key(microseconds: i64, seq: i64) -> String {
    // Zero-padded so lexicographic order == chronological order when used
    // with QueryPrefix. Combining microseconds with a per-order sequence
    // resolves spec.md §9's "two events in the same microsecond could
    // collide" REDESIGN FLAGS item.
    format!("EVENT#{microseconds:020}#{seq:010}")
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("store backend error: {0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// StoredItem
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredItem {
    pub partition: String,
    pub sort: String,
    pub version: i64,
    pub attributes: Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredItem {
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.attributes.clone())
            .map_err(|e| StoreError::Other(format!("deserialize attributes: {e}")))
    }
}

// ---------------------------------------------------------------------------
// UpdateUnderPredicate primitives (the oversell-prevention primitive)
// ---------------------------------------------------------------------------

/// A named, signed arithmetic delta applied to one attribute of an item.
#[derive(Debug, Clone)]
pub struct AttributeDelta {
    pub attribute: String,
    pub amount: i64,
}

impl AttributeDelta {
    pub fn new(attribute: impl Into<String>, amount: i64) -> Self {
        Self {
            attribute: attribute.into(),
            amount,
        }
    }
}

/// The predicate evaluated, atomically with the delta application, against
/// the item's *current* attributes before the delta is applied.
#[derive(Debug, Clone)]
pub enum UpdatePredicate {
    /// `attribute >= value` — used by Reserve to prevent oversell.
    AttributeGte { attribute: String, value: i64 },
    /// Unconditional — used by Release, which is always safe to apply.
    Always,
}

// ---------------------------------------------------------------------------
// KeyedStore
// ---------------------------------------------------------------------------

/// Linearisable single-key operations. Multi-key atomicity is explicitly not
/// required (spec.md §4.A) — the orchestrator's correctness does not depend
/// on cross-key transactions.
///
/// Async because store calls are I/O-bound over Postgres (unlike the
/// teacher's synchronous `BrokerAdapter`, whose broker calls are sync);
/// `async_trait` matches the precedent set by the pack's other async-trait
/// adapters.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Returns `None` both when nothing is stored at this key and when the
    /// stored item's `expires_at` has passed — "records past this are
    /// semantically absent" (spec.md §3).
    async fn get(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
    ) -> Result<Option<StoredItem>, StoreError>;

    /// Writes only if no live (non-expired) item exists at this key.
    async fn put_if_absent(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        attributes: Value,
    ) -> Result<StoredItem, StoreError>;

    /// Writes only if the stored item's `version` equals `expected_version`.
    /// Used for optimistic locking on `Order`.
    async fn put_if_version(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        attributes: Value,
        expected_version: i64,
    ) -> Result<StoredItem, StoreError>;

    /// Atomically applies `deltas` to the item's current attributes iff
    /// `predicate` holds against those attributes beforehand. This is the
    /// oversell-prevention primitive: inventory `quantity` is written only
    /// through this call, never via application-level read-modify-write.
    async fn update_under_predicate(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        deltas: &[AttributeDelta],
        predicate: UpdatePredicate,
    ) -> Result<StoredItem, StoreError>;

    async fn delete(&self, table: &str, partition: &str, sort: &str) -> Result<(), StoreError>;

    /// Ordered items in `partition` whose sort key starts with
    /// `sort_prefix` — used to read an order's full event log.
    async fn query_prefix(
        &self,
        table: &str,
        partition: &str,
        sort_prefix: &str,
    ) -> Result<Vec<StoredItem>, StoreError>;

    /// Best-effort TTL. Records past `at` become invisible to `get` and
    /// `query_prefix`, and no longer block `put_if_absent`.
    async fn set_expiry(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
