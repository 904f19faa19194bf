//! Charge — spec.md §4.D item 3.
//!
//! Grounded in `original_source/services/payment_service/handler.py`'s
//! `_charge`: calls the provider through the shared circuit breaker,
//! forwards the idempotency key so the provider can dedupe independently,
//! and persists the Payment only after a successful charge.
//!
//! A card decline is a business-level answer from a dependency that *did*
//! respond — it must not trip the breaker (spec.md §4.C step 4: "business
//! level returned errors do NOT count as failures"). The closure passed to
//! `CircuitBreaker::call` therefore returns `Result<Result<ChargeResult,
//! String>, anyhow::Error>`: the outer `Result` is what `AnyErrIsFailure`
//! classifies, the inner one carries the decline reason without touching it.

use std::sync::Arc;

use saga_breaker::{AnyErrIsFailure, BreakerError, CircuitBreaker};
use saga_idempotency::IdempotencyRegistry;
use saga_schemas::{BusinessFailure, BusinessFailureKind, Clock, Payment, PaymentStatus, StepOutcome};
use saga_store::{KeyedStore, META_SORT, PAYMENTS_TABLE};
use uuid::Uuid;

use crate::providers::{ChargeRequest, PaymentProvider, ProviderError};

pub struct ChargeInput {
    pub order_id: String,
    pub customer_id: String,
    pub amount_cents: i64,
}

pub async fn charge(
    store: &Arc<dyn KeyedStore>,
    clock: &Arc<dyn Clock>,
    idempotency: &IdempotencyRegistry,
    breaker: &CircuitBreaker,
    provider: &Arc<dyn PaymentProvider>,
    input: ChargeInput,
) -> Result<StepOutcome<Payment>, anyhow::Error> {
    let key = format!("charge-{}", input.order_id);
    let store = store.clone();
    let clock = clock.clone();
    let provider = provider.clone();
    let key_for_provider = key.clone();
    idempotency
        .execute(&key, || charge_once(store, clock, breaker, provider, key_for_provider, input))
        .await
        .map_err(anyhow::Error::from)
}

async fn charge_once(
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
    breaker: &CircuitBreaker,
    provider: Arc<dyn PaymentProvider>,
    idempotency_key: String,
    input: ChargeInput,
) -> Result<StepOutcome<Payment>, anyhow::Error> {
    let req = ChargeRequest {
        customer_id: input.customer_id.clone(),
        amount_cents: input.amount_cents,
        idempotency_key,
    };

    let call_result = breaker
        .call(
            || async move {
                match provider.charge(req).await {
                    Ok(r) => Ok(Ok(r)),
                    Err(ProviderError::Declined(reason)) => Ok(Err(reason)),
                    Err(ProviderError::Transport(e)) => Err(e),
                }
            },
            &AnyErrIsFailure,
        )
        .await;

    let charge_result = match call_result {
        Ok(Ok(r)) => r,
        Ok(Err(decline_reason)) => {
            return Ok(StepOutcome::Business(BusinessFailure {
                kind: BusinessFailureKind::PaymentDeclined,
                message: decline_reason,
                retry_after_seconds: None,
            }));
        }
        Err(BreakerError::Open { resets_at, .. }) => {
            return Ok(StepOutcome::Business(BusinessFailure {
                kind: BusinessFailureKind::PaymentProviderUnavailable,
                message: "payment provider temporarily unavailable".into(),
                retry_after_seconds: Some((resets_at - clock.now()).num_seconds().max(0)),
            }));
        }
        Err(BreakerError::Store(e)) => return Err(e.into()),
    };

    let payment = Payment {
        payment_id: Uuid::new_v4(),
        order_id: input.order_id,
        customer_id: input.customer_id,
        amount_cents: input.amount_cents,
        provider_charge_id: charge_result.provider_charge_id,
        status: PaymentStatus::Charged,
    };

    store
        .put_if_absent(
            PAYMENTS_TABLE,
            &payment.payment_id.to_string(),
            META_SORT,
            serde_json::to_value(&payment)?,
        )
        .await?;

    Ok(StepOutcome::Success(payment))
}
