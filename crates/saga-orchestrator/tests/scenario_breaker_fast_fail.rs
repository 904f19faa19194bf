//! spec.md §8 scenario 5. A forced-open breaker must never be reached by
//! the underlying provider, and the saga must give up and compensate
//! rather than retry the open breaker forever.
//!
//! `saga_testkit::TestClock` only advances when told to, so the saga's
//! deadline (wall-clock in production) needs a stand-in here: a background
//! task nudges the clock forward while the saga's own real-time backoff
//! sleeps run, so the deadline is crossed in a few hundred milliseconds of
//! real time without the breaker's (much longer) cooldown ever elapsing.

use std::time::Duration;

use saga_schemas::{CreateOrderCommand, OrderStatus};
use saga_testkit::{one_item, Harness};

#[tokio::test]
async fn breaker_fast_fail_without_invoking_provider() {
    let mut config = saga_testkit::test_config();
    // Keep the breaker's own cooldown far beyond the saga deadline so it
    // never elapses mid-test and accidentally lets a probe through.
    config.payment_breaker.timeout_seconds = 60;
    let harness = Harness::with_config(i64::MAX, config);
    harness.seed_inventory("MOUSE-02", 10, 1_000).await;

    harness.orchestrator.payment_breaker().force_open().await.unwrap();

    let clock = harness.clock.clone();
    let ticker = tokio::spawn(async move {
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            clock.advance(chrono::Duration::milliseconds(150));
        }
    });

    let start = std::time::Instant::now();
    let response = harness
        .orchestrator
        .create_order(CreateOrderCommand {
            customer_id: "dave".into(),
            items: one_item("MOUSE-02", 1, 1_000),
            idempotency_key: "k5".into(),
        })
        .await
        .unwrap();

    let view = harness
        .wait_for_terminal(&response.order_id, Duration::from_secs(5))
        .await;
    ticker.abort();
    let elapsed = start.elapsed();

    Harness::expect_status(&view, OrderStatus::Failed);
    assert!(elapsed < Duration::from_secs(1), "expected a fast fail, took {elapsed:?}");
    assert_eq!(
        harness.provider.charge_calls(),
        0,
        "an open breaker must never invoke the underlying payment provider"
    );
    assert_eq!(harness.provider.refund_calls(), 0);
    assert_eq!(harness.inventory_quantity("MOUSE-02").await, 10, "reservation must be released");
}
