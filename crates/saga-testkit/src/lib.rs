//! Scenario harness for the order saga — the analogue of `mqk-testkit`'s
//! `Orchestrator`/`OrchestratorConfig` test wiring, generalized to the saga
//! workspace's `Orchestrator`.
//!
//! Nothing here is published to `saga-daemon`; tests depend on it directly.

mod clock;
mod provider;

pub use clock::TestClock;
pub use provider::CountingProvider;

use std::sync::Arc;
use std::time::Duration;

use saga_breaker::BreakerConfig;
use saga_schemas::{Clock, OrderItem, OrderStatus, OrderView};
use saga_steps::{InMemoryBus, PaymentProvider, SimulatedPaymentProvider};
use saga_store::{KeyedStore, MemoryStore, AttributeDelta, UpdatePredicate, INVENTORY_TABLE, META_SORT};
use saga_orchestrator::{Orchestrator, SagaConfig};

/// Test-tuned `SagaConfig`: short backoff and deadlines so scenario tests
/// don't sit through production retry timing, but `max_attempts` preserved
/// so retry-exhaustion behavior is still exercised.
pub fn test_config() -> SagaConfig {
    SagaConfig {
        max_attempts: 3,
        backoff_base: Duration::from_millis(5),
        backoff_factor: 2.0,
        backoff_cap: Duration::from_millis(40),
        jitter_ratio: 0.1,
        per_attempt_timeout: Duration::from_secs(5),
        saga_deadline: Duration::from_secs(2),
        idempotency_ttl: Duration::from_secs(3600),
        payment_breaker: BreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout_seconds: 1,
        },
    }
}

/// Wires a fresh `Orchestrator` over an in-memory store, a deterministic
/// clock, and a `SimulatedPaymentProvider` that declines charges at or above
/// `decline_at_or_above_cents`.
pub struct Harness {
    pub store: Arc<dyn KeyedStore>,
    pub clock: Arc<TestClock>,
    pub provider: Arc<CountingProvider>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(decline_at_or_above_cents: i64) -> Self {
        Self::with_config(decline_at_or_above_cents, test_config())
    }

    pub fn with_config(decline_at_or_above_cents: i64, config: SagaConfig) -> Self {
        let clock = Arc::new(TestClock::default());
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new(dyn_clock.clone()));
        let simulated: Arc<dyn PaymentProvider> = Arc::new(SimulatedPaymentProvider {
            decline_at_or_above_cents,
        });
        let provider = Arc::new(CountingProvider::new(simulated));
        let dyn_provider: Arc<dyn PaymentProvider> = provider.clone();
        let bus = Arc::new(InMemoryBus::default());

        let orchestrator = Orchestrator::new(store.clone(), dyn_clock, dyn_provider, bus, config);

        Self {
            store,
            clock,
            provider,
            orchestrator,
        }
    }

    /// Seeds `inventory` with `quantity` units of `product_id` at
    /// `unit_price_cents`, as if a catalog service had already populated it.
    pub async fn seed_inventory(&self, product_id: &str, quantity: i64, unit_price_cents: i64) {
        self.store
            .put_if_absent(
                INVENTORY_TABLE,
                product_id,
                META_SORT,
                serde_json::json!({
                    "product_id": product_id,
                    "quantity": quantity,
                    "unit_price_cents": unit_price_cents,
                    "name": product_id,
                }),
            )
            .await
            .expect("seed inventory");
    }

    pub async fn inventory_quantity(&self, product_id: &str) -> i64 {
        self.store
            .get(INVENTORY_TABLE, product_id, META_SORT)
            .await
            .expect("read inventory")
            .and_then(|item| item.attributes.get("quantity").and_then(|v| v.as_i64()))
            .expect("inventory row present")
    }

    /// Directly decrements inventory outside of a Reserve call, for setting
    /// up an oversell/race scenario precondition.
    pub async fn force_inventory(&self, product_id: &str, delta: i64) {
        self.store
            .update_under_predicate(
                INVENTORY_TABLE,
                product_id,
                META_SORT,
                &[AttributeDelta::new("quantity", delta)],
                UpdatePredicate::Always,
            )
            .await
            .expect("force inventory delta");
    }

    /// Polls `get_order` until the order reaches a terminal status or
    /// `timeout` elapses. Scenario tests await this after `create_order`
    /// since saga execution runs on a spawned background task.
    pub async fn wait_for_terminal(&self, order_id: &str, timeout: Duration) -> OrderView {
        let start = std::time::Instant::now();
        loop {
            if let Some(view) = self
                .orchestrator
                .get_order(order_id)
                .await
                .expect("get_order")
            {
                if view.order.status.is_terminal() {
                    return view;
                }
            }
            if start.elapsed() > timeout {
                panic!("order {order_id} did not reach a terminal status within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn expect_status(view: &OrderView, status: OrderStatus) {
        assert_eq!(view.order.status, status, "unexpected terminal order status");
    }
}

pub fn one_item(product_id: &str, quantity: i64, unit_price_cents: i64) -> Vec<OrderItem> {
    vec![OrderItem {
        product_id: product_id.to_string(),
        quantity,
        unit_price_cents,
    }]
}
