//! spec.md §8 scenario 6. Once the breaker's cooldown has elapsed, the
//! next call is a probe: a healthy provider closes the breaker again after
//! `success_threshold` successes, and a fresh order confirms normally.

use std::time::Duration;

use saga_schemas::{CircuitState, CreateOrderCommand, OrderStatus};
use saga_testkit::{one_item, Harness};

#[tokio::test]
async fn breaker_recovers_after_cooldown_and_confirms_new_order() {
    let harness = Harness::new(i64::MAX); // healthy provider throughout
    harness.seed_inventory("MOUSE-03", 5, 1_000).await;

    harness.orchestrator.payment_breaker().force_open().await.unwrap();
    assert_eq!(harness.orchestrator.payment_breaker().state().await.unwrap(), CircuitState::Open);

    // test_config's payment_breaker.timeout_seconds is 1; clear it.
    harness.clock.advance(chrono::Duration::seconds(2));

    let response = harness
        .orchestrator
        .create_order(CreateOrderCommand {
            customer_id: "erin".into(),
            items: one_item("MOUSE-03", 1, 1_000),
            idempotency_key: "k6".into(),
        })
        .await
        .unwrap();

    let view = harness
        .wait_for_terminal(&response.order_id, Duration::from_secs(5))
        .await;

    Harness::expect_status(&view, OrderStatus::Confirmed);
    assert_eq!(harness.inventory_quantity("MOUSE-03").await, 4);
    assert_eq!(harness.provider.charge_calls(), 1, "cooldown elapsed: exactly one probe call");
    assert_eq!(
        harness.orchestrator.payment_breaker().state().await.unwrap(),
        CircuitState::Closed
    );
}
