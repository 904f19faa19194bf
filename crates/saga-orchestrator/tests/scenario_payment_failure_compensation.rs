//! spec.md §8 scenario 3. The only scenario that exercises
//! `Orchestrator::compensate`/`fail_with_compensation` end-to-end: Reserve
//! succeeds, Charge is declined, and the saga must unwind the reservation
//! it already holds before marking the order FAILED.

use std::time::Duration;

use saga_schemas::{CreateOrderCommand, OrderStatus};
use saga_testkit::{one_item, Harness};

#[tokio::test]
async fn payment_failure_triggers_compensation() {
    let harness = Harness::new(0); // every charge amount is >= 0, so every charge is declined
    harness.seed_inventory("MOUSE-01", 25, 1_000).await;

    let response = harness
        .orchestrator
        .create_order(CreateOrderCommand {
            customer_id: "carol".into(),
            items: one_item("MOUSE-01", 3, 1_000),
            idempotency_key: "k3".into(),
        })
        .await
        .unwrap();
    assert_eq!(response.status, OrderStatus::Pending);

    let view = harness
        .wait_for_terminal(&response.order_id, Duration::from_secs(5))
        .await;

    Harness::expect_status(&view, OrderStatus::Failed);
    assert_eq!(harness.inventory_quantity("MOUSE-01").await, 25);
    assert_eq!(
        harness.provider.refund_calls(),
        0,
        "no payment was ever created, so there is nothing to refund"
    );
    assert!(
        view.event_log
            .iter()
            .any(|e| e.status_at_time == OrderStatus::Compensating),
        "expected a COMPENSATING event in the log, got {:?}",
        view.event_log
    );
}
