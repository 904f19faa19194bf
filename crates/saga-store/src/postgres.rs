//! Postgres-backed `KeyedStore`.
//!
//! Follows `mqk-db::connect_from_env`/`migrate` exactly: a single env var
//! names the connection string, migrations are embedded via
//! `sqlx::migrate!`, and every fallible call site is `anyhow::Context`-
//! annotated. Queries use plain `sqlx::query`/`Row::try_get` rather than the
//! compile-time-checked `query!` macros, since the macros require a live
//! database at workspace build time — the same tradeoff `mqk-db` makes in
//! most of its hand-written query functions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::{AttributeDelta, KeyedStore, StoreError, StoredItem, UpdatePredicate};

pub const ENV_DB_URL: &str = "SAGA_DATABASE_URL";

/// Connect to Postgres using `SAGA_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("saga-store migrate failed")?;
    Ok(())
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: &sqlx::postgres::PgRow) -> Result<StoredItem, StoreError> {
        Ok(StoredItem {
            partition: row.try_get("partition")?,
            sort: row.try_get("sort")?,
            version: row.try_get("version")?,
            attributes: row.try_get("attributes")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl KeyedStore for PostgresStore {
    async fn get(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
    ) -> Result<Option<StoredItem>, StoreError> {
        let row = sqlx::query(
            r#"
            select partition, sort, version, attributes, expires_at
            from kv_store
            where table_name = $1 and partition = $2 and sort = $3
              and (expires_at is null or expires_at > now())
            "#,
        )
        .bind(table)
        .bind(partition)
        .bind(sort)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn put_if_absent(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        attributes: Value,
    ) -> Result<StoredItem, StoreError> {
        let row = sqlx::query(
            r#"
            insert into kv_store (table_name, partition, sort, version, attributes, expires_at)
            values ($1, $2, $3, 0, $4, null)
            on conflict (table_name, partition, sort) do update
                set version = 0, attributes = excluded.attributes, expires_at = null
                where kv_store.expires_at is not null and kv_store.expires_at <= now()
            returning partition, sort, version, attributes, expires_at
            "#,
        )
        .bind(table)
        .bind(partition)
        .bind(sort)
        .bind(&attributes)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_item(&row),
            None => Err(StoreError::PreconditionFailed),
        }
    }

    async fn put_if_version(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        attributes: Value,
        expected_version: i64,
    ) -> Result<StoredItem, StoreError> {
        let row = sqlx::query(
            r#"
            update kv_store
               set version = version + 1, attributes = $4
             where table_name = $1 and partition = $2 and sort = $3
               and version = $5
               and (expires_at is null or expires_at > now())
            returning partition, sort, version, attributes, expires_at
            "#,
        )
        .bind(table)
        .bind(partition)
        .bind(sort)
        .bind(&attributes)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_item(&row),
            None => Err(StoreError::PreconditionFailed),
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
        let mut tx = self.pool.begin().await.map_err(StoreError::Backend)?;

        let row = sqlx::query(
            r#"
            select partition, sort, version, attributes, expires_at
            from kv_store
            where table_name = $1 and partition = $2 and sort = $3
              and (expires_at is null or expires_at > now())
            for update
            "#,
        )
        .bind(table)
        .bind(partition)
        .bind(sort)
        .fetch_optional(&mut *tx)
        .await?;

        let current = match row {
            Some(row) => Self::row_to_item(&row)?,
            None => return Err(StoreError::NotFound),
        };

        if let UpdatePredicate::AttributeGte { attribute, value } = &predicate {
            let observed = current
                .attributes
                .get(attribute)
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    StoreError::Other(format!("attribute {attribute} missing or not an integer"))
                })?;
            if observed < *value {
                return Err(StoreError::PreconditionFailed);
            }
        }

        let mut attributes = current.attributes.clone();
        for delta in deltas {
            let observed = attributes
                .get(&delta.attribute)
                .and_then(Value::as_i64)
                .unwrap_or(0);
            attributes[delta.attribute.as_str()] = Value::from(observed + delta.amount);
        }

        let updated = sqlx::query(
            r#"
            update kv_store
               set version = version + 1, attributes = $4
             where table_name = $1 and partition = $2 and sort = $3
            returning partition, sort, version, attributes, expires_at
            "#,
        )
        .bind(table)
        .bind(partition)
        .bind(sort)
        .bind(&attributes)
        .fetch_one(&mut *tx)
        .await?;

        let item = Self::row_to_item(&updated)?;
        tx.commit().await.map_err(StoreError::Backend)?;
        Ok(item)
    }

    async fn delete(&self, table: &str, partition: &str, sort: &str) -> Result<(), StoreError> {
        sqlx::query("delete from kv_store where table_name = $1 and partition = $2 and sort = $3")
            .bind(table)
            .bind(partition)
            .bind(sort)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query_prefix(
        &self,
        table: &str,
        partition: &str,
        sort_prefix: &str,
    ) -> Result<Vec<StoredItem>, StoreError> {
        let like_pattern = format!("{}%", sort_prefix.replace('%', "\\%"));
        let rows = sqlx::query(
            r#"
            select partition, sort, version, attributes, expires_at
            from kv_store
            where table_name = $1 and partition = $2 and sort like $3
              and (expires_at is null or expires_at > now())
            order by sort asc
            "#,
        )
        .bind(table)
        .bind(partition)
        .bind(&like_pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn set_expiry(
        &self,
        table: &str,
        partition: &str,
        sort: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "update kv_store set expires_at = $4 where table_name = $1 and partition = $2 and sort = $3",
        )
        .bind(table)
        .bind(partition)
        .bind(sort)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
