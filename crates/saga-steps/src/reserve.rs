//! Reserve — spec.md §4.D item 1.
//!
//! Grounded in `original_source/services/inventory_service/handler.py`'s
//! `_reserve`, with the §9 Open Question 3 hazard fixed per the spec's own
//! resolution: a failed per-item decrement rolls back every decrement
//! already applied *within this invocation* before returning
//! `InsufficientStock`, so a partially-failed Reserve call never leaves
//! inventory short without a matching Reservation to release it.

use std::sync::Arc;

use uuid::Uuid;

use saga_idempotency::IdempotencyRegistry;
use saga_schemas::{
    BusinessFailure, BusinessFailureKind, Clock, OrderItem, Reservation, ReservationStatus, StepOutcome,
};
use saga_store::{AttributeDelta, KeyedStore, UpdatePredicate, INVENTORY_TABLE, META_SORT, RESERVATIONS_TABLE};

pub struct ReserveInput {
    pub order_id: String,
    pub items: Vec<OrderItem>,
}

pub async fn reserve(
    store: &Arc<dyn KeyedStore>,
    clock: &Arc<dyn Clock>,
    idempotency: &IdempotencyRegistry,
    input: ReserveInput,
) -> Result<StepOutcome<Reservation>, anyhow::Error> {
    let key = format!("reserve-{}", input.order_id);
    let clock = clock.clone();
    idempotency
        .execute(&key, || reserve_once(store.clone(), clock, input))
        .await
        .map_err(anyhow::Error::from)
}

async fn reserve_once(
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
    input: ReserveInput,
) -> Result<StepOutcome<Reservation>, anyhow::Error> {
    let mut applied: Vec<&OrderItem> = Vec::with_capacity(input.items.len());

    for item in &input.items {
        let result = store
            .update_under_predicate(
                INVENTORY_TABLE,
                &item.product_id,
                META_SORT,
                &[AttributeDelta::new("quantity", -item.quantity)],
                UpdatePredicate::AttributeGte {
                    attribute: "quantity".into(),
                    value: item.quantity,
                },
            )
            .await;

        match result {
            Ok(_) => applied.push(item),
            Err(_) => {
                // Roll back every decrement already applied in this call
                // before returning — an item's own failure must not leave
                // stock short with no Reservation to account for it.
                for rolled_back in &applied {
                    store
                        .update_under_predicate(
                            INVENTORY_TABLE,
                            &rolled_back.product_id,
                            META_SORT,
                            &[AttributeDelta::new("quantity", rolled_back.quantity)],
                            UpdatePredicate::Always,
                        )
                        .await?;
                }
                return Ok(StepOutcome::Business(BusinessFailure {
                    kind: BusinessFailureKind::InsufficientStock,
                    message: format!("insufficient stock for product {}", item.product_id),
                    retry_after_seconds: None,
                }));
            }
        }
    }

    let reservation = Reservation {
        reservation_id: Uuid::new_v4(),
        order_id: input.order_id,
        items: input.items,
        status: ReservationStatus::Active,
        created_at: clock.now(),
    };

    store
        .put_if_absent(
            RESERVATIONS_TABLE,
            &reservation.reservation_id.to_string(),
            META_SORT,
            serde_json::to_value(&reservation)?,
        )
        .await?;

    Ok(StepOutcome::Success(reservation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_schemas::SystemClock;
    use saga_store::MemoryStore;
    use serde_json::json;

    fn store() -> Arc<dyn KeyedStore> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Arc::new(MemoryStore::new(clock))
    }

    fn registry(store: Arc<dyn KeyedStore>, clock: Arc<dyn Clock>) -> IdempotencyRegistry {
        IdempotencyRegistry::new(store, clock, std::time::Duration::from_secs(3600))
    }

    async fn seed(store: &Arc<dyn KeyedStore>, product_id: &str, quantity: i64) {
        store
            .put_if_absent(
                INVENTORY_TABLE,
                product_id,
                META_SORT,
                json!({"product_id": product_id, "quantity": quantity, "unit_price_cents": 100, "name": product_id}),
            )
            .await
            .unwrap();
    }

    fn item(product_id: &str, quantity: i64) -> OrderItem {
        OrderItem {
            product_id: product_id.to_string(),
            quantity,
            unit_price_cents: 100,
        }
    }

    #[tokio::test]
    async fn reserves_multiple_items_and_decrements_each() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = store();
        seed(&store, "A", 5).await;
        seed(&store, "B", 3).await;
        let idem = registry(store.clone(), clock.clone());

        let outcome = reserve(
            &store,
            &clock,
            &idem,
            ReserveInput {
                order_id: "order-1".into(),
                items: vec![item("A", 2), item("B", 1)],
            },
        )
        .await
        .unwrap();

        assert!(outcome.is_success());
        let a = store.get(INVENTORY_TABLE, "A", META_SORT).await.unwrap().unwrap();
        assert_eq!(a.attributes["quantity"], 3);
        let b = store.get(INVENTORY_TABLE, "B", META_SORT).await.unwrap().unwrap();
        assert_eq!(b.attributes["quantity"], 2);
    }

    #[tokio::test]
    async fn rolls_back_earlier_decrements_when_a_later_item_oversells() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = store();
        seed(&store, "A", 5).await;
        seed(&store, "B", 1).await;
        let idem = registry(store.clone(), clock.clone());

        let outcome = reserve(
            &store,
            &clock,
            &idem,
            ReserveInput {
                order_id: "order-2".into(),
                items: vec![item("A", 2), item("B", 5)],
            },
        )
        .await
        .unwrap();

        match outcome {
            StepOutcome::Business(failure) => assert_eq!(failure.kind, BusinessFailureKind::InsufficientStock),
            StepOutcome::Success(_) => panic!("expected insufficient stock"),
        }

        // A's decrement must be rolled back to its pre-call quantity, not
        // left short with no Reservation to account for it.
        let a = store.get(INVENTORY_TABLE, "A", META_SORT).await.unwrap().unwrap();
        assert_eq!(a.attributes["quantity"], 5);
        let b = store.get(INVENTORY_TABLE, "B", META_SORT).await.unwrap().unwrap();
        assert_eq!(b.attributes["quantity"], 1);
    }

    #[tokio::test]
    async fn rejects_oversell_on_the_first_item_with_nothing_to_roll_back() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = store();
        seed(&store, "A", 1).await;
        let idem = registry(store.clone(), clock.clone());

        let outcome = reserve(
            &store,
            &clock,
            &idem,
            ReserveInput {
                order_id: "order-3".into(),
                items: vec![item("A", 2)],
            },
        )
        .await
        .unwrap();

        match outcome {
            StepOutcome::Business(failure) => assert_eq!(failure.kind, BusinessFailureKind::InsufficientStock),
            StepOutcome::Success(_) => panic!("expected insufficient stock"),
        }
        let a = store.get(INVENTORY_TABLE, "A", META_SORT).await.unwrap().unwrap();
        assert_eq!(a.attributes["quantity"], 1);
    }
}
