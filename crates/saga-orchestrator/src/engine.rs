//! `Orchestrator` — spec.md §4.E.
//!
//! Executes the Reserve -> Charge -> Confirm / Release -> Fail DAG for one
//! order. Forward steps that return a business failure are not retried;
//! infrastructure exceptions are retried with backoff up to `max_attempts`
//! and the saga deadline, then treated as business-level (spec.md §5).
//! Status writes use optimistic locking with re-decide-on-conflict, which is
//! safe because every step is idempotent (spec.md §4.E).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use saga_breaker::CircuitBreaker;
use saga_idempotency::{IdempotencyError, IdempotencyRegistry};
use saga_schemas::{
    BusinessFailure, BusinessFailureKind, Clock, CreateOrderCommand, CreateOrderResponse, NotificationEnvelope,
    NotificationType, Order, OrderEvent, OrderStatus, OrderTransition, OrderView, Payment, StepOutcome,
    ValidationError,
};
use saga_steps::{ChargeInput, NotificationBus, PaymentProvider, ReserveInput};
use saga_store::{event_sort_key, KeyedStore, StoreError, ORDERS_TABLE, META_SORT};

use crate::config::SagaConfig;
use crate::context::SagaContext;
use crate::retry::retry_until;

#[derive(Debug, thiserror::Error)]
pub enum CreateOrderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),
}

pub struct Orchestrator {
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
    idempotency: Arc<IdempotencyRegistry>,
    breaker: Arc<CircuitBreaker>,
    provider: Arc<dyn PaymentProvider>,
    bus: Arc<dyn NotificationBus>,
    config: SagaConfig,
    /// Execution identity enforcement: `order-saga-<order_id>` may run at
    /// most once concurrently (spec.md §4.E).
    active_sagas: Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn PaymentProvider>,
        bus: Arc<dyn NotificationBus>,
        config: SagaConfig,
    ) -> Arc<Self> {
        let idempotency = Arc::new(IdempotencyRegistry::new(
            store.clone(),
            clock.clone(),
            config.idempotency_ttl,
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            "external-payment-provider",
            config.payment_breaker,
            store.clone(),
            clock.clone(),
        ));
        Arc::new(Self {
            store,
            clock,
            idempotency,
            breaker,
            provider,
            bus,
            config,
            active_sagas: Mutex::new(HashSet::new()),
        })
    }

    pub fn payment_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    // -----------------------------------------------------------------
    // Inbound command / query — spec.md §6
    // -----------------------------------------------------------------

    /// Creates an order (or returns the existing one for a duplicate
    /// `idempotency_key`) and kicks off its saga in the background. Returns
    /// synchronously with `PENDING`, matching the "202-equivalent" contract.
    pub async fn create_order(
        self: &Arc<Self>,
        command: CreateOrderCommand,
    ) -> Result<CreateOrderResponse, CreateOrderError> {
        if command.idempotency_key.trim().is_empty() {
            return Err(ValidationError::MissingIdempotencyKey.into());
        }

        let key = format!("create-order-{}", command.idempotency_key);
        let this = Arc::clone(self);
        let response = self
            .idempotency
            .execute(&key, move || async move { this.start_new_order(command).await })
            .await?;
        Ok(response)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<OrderView>, anyhow::Error> {
        let Some(item) = self.store.get(ORDERS_TABLE, order_id, META_SORT).await? else {
            return Ok(None);
        };
        let order: Order = item.deserialize()?;

        let event_items = self.store.query_prefix(ORDERS_TABLE, order_id, "EVENT#").await?;
        let mut event_log = Vec::with_capacity(event_items.len());
        for item in event_items {
            let event: OrderEvent = item.deserialize()?;
            event_log.push(event);
        }

        Ok(Some(OrderView { order, event_log }))
    }

    // -----------------------------------------------------------------
    // Order creation + saga kickoff
    // -----------------------------------------------------------------

    async fn start_new_order(self: Arc<Self>, command: CreateOrderCommand) -> Result<CreateOrderResponse, anyhow::Error> {
        let order_id = Uuid::new_v4().to_string();
        let correlation_id = Uuid::new_v4().to_string();
        let now = self.clock.now();

        let mut order = Order::new(
            order_id.clone(),
            command.customer_id,
            command.items,
            correlation_id,
            now,
        );
        let event_seq = order.event_seq;
        order.event_seq += 1;

        self.store
            .put_if_absent(ORDERS_TABLE, &order_id, META_SORT, serde_json::to_value(&order)?)
            .await?;
        self.append_event(&order_id, event_seq, OrderStatus::Pending, now, json!({"event": "order_created"}))
            .await?;

        let saga_self = Arc::clone(&self);
        let saga_order_id = order_id.clone();
        tokio::spawn(async move { saga_self.run_saga(saga_order_id).await });

        Ok(CreateOrderResponse {
            order_id,
            status: OrderStatus::Pending,
        })
    }

    // -----------------------------------------------------------------
    // Saga execution
    // -----------------------------------------------------------------

    /// Runs the order's saga to completion (CONFIRMED or FAILED). Rejects a
    /// duplicate start for the same `order_id` — one order maps to one saga
    /// execution at a time.
    pub async fn run_saga(self: Arc<Self>, order_id: String) {
        {
            let mut active = self.active_sagas.lock().await;
            if !active.insert(order_id.clone()) {
                tracing::warn!(order_id = %order_id, "duplicate saga start rejected");
                return;
            }
        }

        if let Err(e) = self.run_saga_inner(&order_id).await {
            tracing::error!(order_id = %order_id, error = %e, "saga execution failed unexpectedly");
        }

        self.active_sagas.lock().await.remove(&order_id);
    }

    async fn run_saga_inner(&self, order_id: &str) -> Result<(), anyhow::Error> {
        let item = self
            .store
            .get(ORDERS_TABLE, order_id, META_SORT)
            .await?
            .ok_or_else(|| anyhow::anyhow!("order {order_id} not found at saga start"))?;
        let order: Order = item.deserialize()?;

        let deadline = order.created_at
            + chrono::Duration::from_std(self.config.saga_deadline).unwrap_or_else(|_| chrono::Duration::zero());
        let mut ctx = SagaContext::new(
            order.order_id.clone(),
            order.customer_id.clone(),
            order.total_cents,
            order.items.clone(),
            order.correlation_id.clone(),
            deadline,
        );

        let reserve_outcome = self
            .call_step_with_retry(deadline, || {
                saga_steps::reserve(
                    &self.store,
                    &self.clock,
                    &self.idempotency,
                    ReserveInput {
                        order_id: ctx.order_id.clone(),
                        items: ctx.items.clone(),
                    },
                )
            })
            .await?;

        let reservation = match reserve_outcome {
            StepOutcome::Business(failure) => {
                // Nothing was reserved — straight to FAILED, no compensation.
                self.transition_order(order_id, OrderTransition::Fail, json!({"reason": &failure}))
                    .await?;
                self.notify_failure(&ctx, &failure).await;
                return Ok(());
            }
            StepOutcome::Success(reservation) => reservation,
        };

        ctx.reservation_id = Some(reservation.reservation_id);
        self.transition_order(
            order_id,
            OrderTransition::ReserveInventory,
            json!({"reservation_id": reservation.reservation_id}),
        )
        .await?;

        let charge_outcome = self.charge_with_breaker_retry(&ctx, deadline).await?;

        let payment = match charge_outcome {
            StepOutcome::Business(failure) => {
                return self.fail_with_compensation(order_id, &mut ctx, failure).await;
            }
            StepOutcome::Success(payment) => payment,
        };

        ctx.payment_id = Some(payment.payment_id);
        self.transition_order(
            order_id,
            OrderTransition::ChargePayment,
            json!({"payment_id": payment.payment_id}),
        )
        .await?;

        self.transition_order(order_id, OrderTransition::Confirm, json!({})).await?;
        self.notify_success(&ctx).await;
        Ok(())
    }

    /// Calls Charge, and when the breaker is open, keeps retrying (per
    /// `retry_after_seconds`) until the saga deadline rather than
    /// compensating on the first open — spec.md §7: `BreakerOpen` is
    /// "treated as transient; orchestrator may retry after `resets_at` up to
    /// saga deadline, then treats as declined and compensates."
    async fn charge_with_breaker_retry(
        &self,
        ctx: &SagaContext,
        deadline: DateTime<Utc>,
    ) -> Result<StepOutcome<Payment>, anyhow::Error> {
        loop {
            let outcome = self
                .call_step_with_retry(deadline, || {
                    saga_steps::charge(
                        &self.store,
                        &self.clock,
                        &self.idempotency,
                        &self.breaker,
                        &self.provider,
                        ChargeInput {
                            order_id: ctx.order_id.clone(),
                            customer_id: ctx.customer_id.clone(),
                            amount_cents: ctx.total_cents,
                        },
                    )
                })
                .await?;

            if let StepOutcome::Business(failure) = &outcome {
                if failure.kind == BusinessFailureKind::PaymentProviderUnavailable
                    && !ctx.deadline_passed(self.clock.now())
                {
                    let wait = Duration::from_secs(failure.retry_after_seconds.unwrap_or(1).max(0) as u64)
                        .min(self.config.backoff_cap);
                    tokio::time::sleep(wait).await;
                    continue;
                }
            }
            return Ok(outcome);
        }
    }

    async fn fail_with_compensation(
        &self,
        order_id: &str,
        ctx: &mut SagaContext,
        failure: BusinessFailure,
    ) -> Result<(), anyhow::Error> {
        self.transition_order(order_id, OrderTransition::BeginCompensation, json!({"reason": &failure}))
            .await?;
        self.compensate(ctx).await?;
        self.transition_order(order_id, OrderTransition::Fail, json!({"reason": &failure}))
            .await?;
        self.notify_failure(ctx, &failure).await;
        Ok(())
    }

    /// Compensation order is strictly reverse of the successful forward
    /// prefix: Refund before Release. Compensations carry no further
    /// compensation of their own; exhausting retries here is a `StuckSaga`
    /// alert, not a silent failure.
    async fn compensate(&self, ctx: &SagaContext) -> Result<(), anyhow::Error> {
        // Compensation actions are not cancellable by the saga deadline
        // (spec.md §5); bound them by attempt count only, not wall clock.
        let far_future = self.clock.now() + chrono::Duration::days(1);

        if let Some(payment_id) = ctx.payment_id {
            if let Err(e) = retry_until(&self.config, &self.clock, far_future, || {
                saga_steps::refund(&self.store, &self.idempotency, &self.breaker, &self.provider, payment_id)
            })
            .await
            {
                self.alert_stuck_saga(&ctx.order_id, "refund", &e);
                return Err(e);
            }
        }

        if let Some(reservation_id) = ctx.reservation_id {
            if let Err(e) =
                retry_until(&self.config, &self.clock, far_future, || {
                    saga_steps::release(&self.store, &self.idempotency, reservation_id)
                })
                .await
            {
                self.alert_stuck_saga(&ctx.order_id, "release", &e);
                return Err(e);
            }
        }

        Ok(())
    }

    fn alert_stuck_saga(&self, order_id: &str, step: &str, error: &anyhow::Error) {
        tracing::error!(
            order_id = %order_id,
            step,
            error = %error,
            "StuckSaga: compensation exhausted, human action required"
        );
    }

    async fn call_step_with_retry<T, F, Fut>(
        &self,
        deadline: DateTime<Utc>,
        step: F,
    ) -> Result<StepOutcome<T>, anyhow::Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<StepOutcome<T>, anyhow::Error>>,
    {
        match retry_until(&self.config, &self.clock, deadline, step).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::warn!(error = %e, "step retries exhausted, treating as business failure");
                Ok(StepOutcome::Business(BusinessFailure {
                    kind: BusinessFailureKind::RetriesExhausted,
                    message: format!("{e:#}"),
                    retry_after_seconds: None,
                }))
            }
        }
    }

    // -----------------------------------------------------------------
    // Order status transitions + event log (spec.md §4.E, §5)
    // -----------------------------------------------------------------

    async fn transition_order(
        &self,
        order_id: &str,
        transition: OrderTransition,
        metadata: serde_json::Value,
    ) -> Result<Order, anyhow::Error> {
        loop {
            let item = self
                .store
                .get(ORDERS_TABLE, order_id, META_SORT)
                .await?
                .ok_or_else(|| anyhow::anyhow!("order {order_id} not found"))?;
            let mut order: Order = item.deserialize()?;

            let new_status = order.status.apply(transition).map_err(anyhow::Error::from)?;
            let now = self.clock.now();
            let event_seq = order.event_seq;

            order.status = new_status;
            order.updated_at = now;
            order.version = item.version + 1;
            order.event_seq = event_seq + 1;

            match self
                .store
                .put_if_version(ORDERS_TABLE, order_id, META_SORT, serde_json::to_value(&order)?, item.version)
                .await
            {
                Ok(_) => {
                    self.append_event(order_id, event_seq, new_status, now, metadata).await?;
                    return Ok(order);
                }
                // Concurrent writer won — re-read and re-decide. Safe
                // because every step is idempotent (spec.md §4.E).
                Err(StoreError::PreconditionFailed) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn append_event(
        &self,
        order_id: &str,
        sequence: i64,
        status_at_time: OrderStatus,
        occurred_at: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> Result<(), anyhow::Error> {
        let event = OrderEvent {
            order_id: order_id.to_string(),
            sequence,
            status_at_time,
            metadata,
            occurred_at,
        };
        let sort = event_sort_key(occurred_at.timestamp_micros(), sequence);
        self.store
            .put_if_absent(ORDERS_TABLE, order_id, &sort, serde_json::to_value(&event)?)
            .await?;
        Ok(())
    }

    async fn notify_success(&self, ctx: &SagaContext) {
        let envelope = NotificationEnvelope {
            notification_type: NotificationType::OrderConfirmed,
            order_id: ctx.order_id.clone(),
            customer_id: ctx.customer_id.clone(),
            total_cents: Some(ctx.total_cents),
            error_reason: None,
        };
        self.publish_notification(envelope).await;
    }

    async fn notify_failure(&self, ctx: &SagaContext, failure: &BusinessFailure) {
        let envelope = NotificationEnvelope {
            notification_type: NotificationType::OrderFailed,
            order_id: ctx.order_id.clone(),
            customer_id: ctx.customer_id.clone(),
            total_cents: None,
            error_reason: Some(failure.message.clone()),
        };
        self.publish_notification(envelope).await;
    }

    async fn publish_notification(&self, envelope: NotificationEnvelope) {
        if let Err(e) = saga_steps::notify(&self.bus, &self.idempotency, envelope).await {
            tracing::warn!(error = %e, "notify failed (non-critical)");
        }
    }
}
