//! Refund — spec.md §4.D item 4, the compensation for Charge.
//!
//! Grounded in `original_source/services/payment_service/handler.py`'s
//! `_refund`: an absent payment means nothing to refund (idempotent
//! no-op success), the provider call goes through the same breaker as
//! Charge, and the payment is marked REFUNDED only after the provider call
//! succeeds.

use std::sync::Arc;

use saga_breaker::{AnyErrIsFailure, BreakerError, CircuitBreaker};
use saga_idempotency::IdempotencyRegistry;
use saga_schemas::{Payment, PaymentStatus, StepOutcome};
use saga_store::{KeyedStore, META_SORT, PAYMENTS_TABLE};
use uuid::Uuid;

use crate::providers::{PaymentProvider, RefundRequest};

pub async fn refund(
    store: &Arc<dyn KeyedStore>,
    idempotency: &IdempotencyRegistry,
    breaker: &CircuitBreaker,
    provider: &Arc<dyn PaymentProvider>,
    payment_id: Uuid,
) -> Result<StepOutcome<()>, anyhow::Error> {
    let key = format!("refund-{payment_id}");
    let store = store.clone();
    let provider = provider.clone();
    idempotency
        .execute(&key, || refund_once(store, breaker, provider, key.clone(), payment_id))
        .await
        .map_err(anyhow::Error::from)
}

async fn refund_once(
    store: Arc<dyn KeyedStore>,
    breaker: &CircuitBreaker,
    provider: Arc<dyn PaymentProvider>,
    idempotency_key: String,
    payment_id: Uuid,
) -> Result<StepOutcome<()>, anyhow::Error> {
    let item = store.get(PAYMENTS_TABLE, &payment_id.to_string(), META_SORT).await?;
    let Some(item) = item else {
        return Ok(StepOutcome::Success(()));
    };

    let mut payment: Payment = item.deserialize()?;
    if payment.status == PaymentStatus::Refunded {
        return Ok(StepOutcome::Success(()));
    }

    let req = RefundRequest {
        provider_charge_id: payment.provider_charge_id.clone(),
        idempotency_key,
    };

    let call_result = breaker
        .call(
            || async move { provider.refund(req).await.map_err(anyhow::Error::from) },
            &AnyErrIsFailure,
        )
        .await;

    match call_result {
        Ok(()) => {}
        Err(BreakerError::Open { .. }) => {
            // Refund is the compensation path — it has no further
            // compensation, so breaker-open here is an infra exception the
            // orchestrator retries, never a terminal business failure.
            anyhow::bail!("refund blocked: payment provider circuit is open");
        }
        Err(BreakerError::Store(e)) => return Err(e.into()),
    }

    payment.status = PaymentStatus::Refunded;
    store
        .put_if_version(
            PAYMENTS_TABLE,
            &payment_id.to_string(),
            META_SORT,
            serde_json::to_value(&payment)?,
            item.version,
        )
        .await?;

    Ok(StepOutcome::Success(()))
}
