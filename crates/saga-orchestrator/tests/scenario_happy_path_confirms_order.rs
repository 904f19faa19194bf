//! spec.md §8 scenario 1.

use std::time::Duration;

use saga_schemas::{CreateOrderCommand, OrderStatus};
use saga_testkit::{one_item, Harness};

#[tokio::test]
async fn happy_path_confirms_order() {
    let harness = Harness::new(i64::MAX);
    harness.seed_inventory("LAPTOP-01", 10, 149_900).await;

    let response = harness
        .orchestrator
        .create_order(CreateOrderCommand {
            customer_id: "alice".into(),
            items: one_item("LAPTOP-01", 1, 149_900),
            idempotency_key: "k1".into(),
        })
        .await
        .unwrap();
    assert_eq!(response.status, OrderStatus::Pending);

    let view = harness
        .wait_for_terminal(&response.order_id, Duration::from_secs(5))
        .await;

    Harness::expect_status(&view, OrderStatus::Confirmed);
    assert_eq!(harness.inventory_quantity("LAPTOP-01").await, 9);
    assert_eq!(view.order.total_cents, 149_900);
    assert!(
        view.event_log.len() >= 4,
        "expected at least PENDING, INVENTORY_RESERVED, PAYMENT_CHARGED, CONFIRMED events, got {:?}",
        view.event_log
    );
}
