//! Deterministic in-memory `KeyedStore`, the analogue of `mqk-broker-paper`
//! standing in for a real broker adapter: used by unit/integration tests and
//! by `saga-testkit`'s scenario harness.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use saga_schemas::Clock;

use crate::{AttributeDelta, KeyedStore, StoreError, StoredItem, UpdatePredicate};

type Key = (String, String, String);

#[derive(Default)]
struct Inner {
    items: BTreeMap<Key, StoredItem>,
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn is_live(item: &StoredItem, now: DateTime<Utc>) -> bool {
        match item.expires_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
    ) -> Result<Option<StoredItem>, StoreError> {
        let now = self.clock.now();
        let guard = self.inner.lock().await;
        let key = (table.to_string(), partition.to_string(), sort.to_string());
        Ok(guard
            .items
            .get(&key)
            .filter(|item| Self::is_live(item, now))
            .cloned())
    }

    async fn put_if_absent(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        attributes: Value,
    ) -> Result<StoredItem, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().await;
        let key = (table.to_string(), partition.to_string(), sort.to_string());

        if let Some(existing) = guard.items.get(&key) {
            if Self::is_live(existing, now) {
                return Err(StoreError::PreconditionFailed);
            }
        }

        let item = StoredItem {
            partition: partition.to_string(),
            sort: sort.to_string(),
            version: 0,
            attributes,
            expires_at: None,
        };
        guard.items.insert(key, item.clone());
        Ok(item)
    }

    async fn put_if_version(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        attributes: Value,
        expected_version: i64,
    ) -> Result<StoredItem, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().await;
        let key = (table.to_string(), partition.to_string(), sort.to_string());

        let live_version = guard
            .items
            .get(&key)
            .filter(|item| Self::is_live(item, now))
            .map(|item| item.version);

        match live_version {
            Some(v) if v == expected_version => {
                let item = StoredItem {
                    partition: partition.to_string(),
                    sort: sort.to_string(),
                    version: v + 1,
                    attributes,
                    expires_at: None,
                };
                guard.items.insert(key, item.clone());
                Ok(item)
            }
            _ => Err(StoreError::PreconditionFailed),
        }
    }

    async fn update_under_predicate(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        deltas: &[AttributeDelta],
        predicate: UpdatePredicate,
    ) -> Result<StoredItem, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().await;
        let key = (table.to_string(), partition.to_string(), sort.to_string());

        let existing = guard
            .items
            .get(&key)
            .filter(|item| Self::is_live(item, now))
            .cloned()
            .ok_or(StoreError::NotFound)?;

        if let UpdatePredicate::AttributeGte { attribute, value } = &predicate {
            let current = existing
                .attributes
                .get(attribute)
                .and_then(Value::as_i64)
                .ok_or_else(|| StoreError::Other(format!("attribute {attribute} missing or not an integer")))?;
            if current < *value {
                return Err(StoreError::PreconditionFailed);
            }
        }

        let mut attributes = existing.attributes.clone();
        for delta in deltas {
            let current = attributes
                .get(&delta.attribute)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            attributes[delta.attribute.as_str()] = Value::from(current + delta.amount);
        }

        let item = StoredItem {
            partition: partition.to_string(),
            sort: sort.to_string(),
            version: existing.version + 1,
            attributes,
            expires_at: existing.expires_at,
        };
        guard.items.insert(key, item.clone());
        Ok(item)
    }

    async fn delete(&self, table: &str, partition: &str, sort: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let key = (table.to_string(), partition.to_string(), sort.to_string());
        guard.items.remove(&key);
        Ok(())
    }

    async fn query_prefix(
        &self,
        table: &str,
        partition: &str,
        sort_prefix: &str,
    ) -> Result<Vec<StoredItem>, StoreError> {
        let now = self.clock.now();
        let guard = self.inner.lock().await;
        let items = guard
            .items
            .iter()
            .filter(|((t, p, s), item)| {
                t == table
                    && p == partition
                    && s.starts_with(sort_prefix)
                    && Self::is_live(item, now)
            })
            .map(|(_, item)| item.clone())
            .collect();
        Ok(items)
    }

    async fn set_expiry(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let key = (table.to_string(), partition.to_string(), sort.to_string());
        match guard.items.get_mut(&key) {
            Some(item) => {
                item.expires_at = Some(at);
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}
