//! Release — spec.md §4.D item 2, the compensation for Reserve.
//!
//! Grounded in `original_source/services/inventory_service/handler.py`'s
//! `_release`: reading an absent or already-released reservation is success
//! (idempotent no-op), and the inventory increment is unconditional because
//! addition can never oversell.

use std::sync::Arc;

use uuid::Uuid;

use saga_idempotency::IdempotencyRegistry;
use saga_schemas::{Reservation, ReservationStatus, StepOutcome};
use saga_store::{AttributeDelta, KeyedStore, UpdatePredicate, INVENTORY_TABLE, META_SORT, RESERVATIONS_TABLE};

pub async fn release(
    store: &Arc<dyn KeyedStore>,
    idempotency: &IdempotencyRegistry,
    reservation_id: Uuid,
) -> Result<StepOutcome<()>, anyhow::Error> {
    let key = format!("release-{reservation_id}");
    idempotency
        .execute(&key, || release_once(store.clone(), reservation_id))
        .await
        .map_err(anyhow::Error::from)
}

async fn release_once(store: Arc<dyn KeyedStore>, reservation_id: Uuid) -> Result<StepOutcome<()>, anyhow::Error> {
    let item = store
        .get(RESERVATIONS_TABLE, &reservation_id.to_string(), META_SORT)
        .await?;

    let Some(item) = item else {
        return Ok(StepOutcome::Success(()));
    };

    let mut reservation: Reservation = item.deserialize()?;
    if reservation.status == ReservationStatus::Released {
        return Ok(StepOutcome::Success(()));
    }

    for order_item in &reservation.items {
        store
            .update_under_predicate(
                INVENTORY_TABLE,
                &order_item.product_id,
                META_SORT,
                &[AttributeDelta::new("quantity", order_item.quantity)],
                UpdatePredicate::Always,
            )
            .await?;
    }

    reservation.status = ReservationStatus::Released;
    store
        .put_if_version(
            RESERVATIONS_TABLE,
            &reservation_id.to_string(),
            META_SORT,
            serde_json::to_value(&reservation)?,
            item.version,
        )
        .await?;

    Ok(StepOutcome::Success(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use saga_schemas::{OrderItem, SystemClock};
    use saga_store::MemoryStore;
    use serde_json::json;

    fn store() -> Arc<dyn KeyedStore> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Arc::new(MemoryStore::new(clock))
    }

    fn registry(store: Arc<dyn KeyedStore>) -> IdempotencyRegistry {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        IdempotencyRegistry::new(store, clock, std::time::Duration::from_secs(3600))
    }

    fn reservation(status: ReservationStatus) -> Reservation {
        Reservation {
            reservation_id: Uuid::new_v4(),
            order_id: "order-1".into(),
            items: vec![OrderItem {
                product_id: "A".into(),
                quantity: 2,
                unit_price_cents: 100,
            }],
            status,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn releasing_unknown_reservation_is_a_no_op_success() {
        let store = store();
        let idem = registry(store.clone());
        let outcome = release(&store, &idem, Uuid::new_v4()).await.unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn release_increments_inventory_and_marks_released() {
        let store = store();
        store
            .put_if_absent(INVENTORY_TABLE, "A", META_SORT, json!({"quantity": 3}))
            .await
            .unwrap();
        let res = reservation(ReservationStatus::Active);
        store
            .put_if_absent(
                RESERVATIONS_TABLE,
                &res.reservation_id.to_string(),
                META_SORT,
                serde_json::to_value(&res).unwrap(),
            )
            .await
            .unwrap();
        let idem = registry(store.clone());

        let outcome = release(&store, &idem, res.reservation_id).await.unwrap();
        assert!(outcome.is_success());

        let inv = store.get(INVENTORY_TABLE, "A", META_SORT).await.unwrap().unwrap();
        assert_eq!(inv.attributes["quantity"], 5);

        let stored: Reservation = store
            .get(RESERVATIONS_TABLE, &res.reservation_id.to_string(), META_SORT)
            .await
            .unwrap()
            .unwrap()
            .deserialize()
            .unwrap();
        assert_eq!(stored.status, ReservationStatus::Released);
    }

    #[tokio::test]
    async fn releasing_an_already_released_reservation_does_not_double_increment() {
        let store = store();
        store
            .put_if_absent(INVENTORY_TABLE, "A", META_SORT, json!({"quantity": 3}))
            .await
            .unwrap();
        let res = reservation(ReservationStatus::Released);
        store
            .put_if_absent(
                RESERVATIONS_TABLE,
                &res.reservation_id.to_string(),
                META_SORT,
                serde_json::to_value(&res).unwrap(),
            )
            .await
            .unwrap();
        let idem = registry(store.clone());

        let outcome = release(&store, &idem, res.reservation_id).await.unwrap();
        assert!(outcome.is_success());

        let inv = store.get(INVENTORY_TABLE, "A", META_SORT).await.unwrap().unwrap();
        assert_eq!(inv.attributes["quantity"], 3);
    }
}
