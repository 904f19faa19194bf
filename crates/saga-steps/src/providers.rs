//! Adapter traits the step executors call through — spec.md §4.D, §1's
//! explicit out-of-scope boundary on payment provider wire formats.
//!
//! `PaymentProvider` generalizes `mqk-execution::order_router::BrokerAdapter`
//! (submit/cancel/replace becomes charge/refund); `NotificationBus`
//! generalizes `mqk-daemon::state::AppState`'s `tokio::sync::broadcast`
//! channel. Each trait ships exactly one implementation suitable for tests
//! and local/paper operation — a live payment SDK integration is explicitly
//! out of scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use saga_schemas::NotificationEnvelope;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub customer_id: String,
    pub amount_cents: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct ChargeResult {
    pub provider_charge_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub provider_charge_id: String,
    pub idempotency_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("card declined: {0}")]
    Declined(String),
    #[error("payment provider transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// The single choke-point through which Charge/Refund reach an external
/// payment dependency. Always called through `saga_breaker::CircuitBreaker`
/// by the step executors — this trait has no breaker of its own.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError>;
    async fn refund(&self, req: RefundRequest) -> Result<(), ProviderError>;
}

/// Deterministic provider for tests and paper/local operation. Grounded in
/// both `mqk-broker-paper`'s fill simulator and
/// `original_source`'s `_call_payment_provider` mock — no live network call,
/// always succeeds unless the amount carries a sentinel that requests a
/// decline (used by scenario tests to exercise the decline path without
/// relying on randomness).
pub struct SimulatedPaymentProvider {
    /// Amounts at or above this threshold are declined. Scenario tests pick
    /// amounts above/below it to force either outcome deterministically.
    pub decline_at_or_above_cents: i64,
}

impl Default for SimulatedPaymentProvider {
    fn default() -> Self {
        Self {
            decline_at_or_above_cents: i64::MAX,
        }
    }
}

#[async_trait]
impl PaymentProvider for SimulatedPaymentProvider {
    async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
        if req.amount_cents >= self.decline_at_or_above_cents {
            return Err(ProviderError::Declined("card declined by issuer".into()));
        }
        Ok(ChargeResult {
            provider_charge_id: format!("ch_{}", uuid::Uuid::new_v4().simple()),
        })
    }

    async fn refund(&self, _req: RefundRequest) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Publishes outbound notification envelopes. Generalizes the teacher's
/// `broadcast::Sender<BusMsg>` SSE bus to the one message this system
/// publishes: order lifecycle notifications.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, envelope: NotificationEnvelope) -> Result<(), anyhow::Error>;
}

/// In-process bus backed by `tokio::sync::broadcast`, exactly the pattern
/// `mqk-daemon::state::AppState` uses for its SSE channel. Consumers
/// (notification logging, test assertions) subscribe via `subscribe()`.
pub struct InMemoryBus {
    sender: tokio::sync::broadcast::Sender<NotificationEnvelope>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _rx) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NotificationEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl NotificationBus for InMemoryBus {
    async fn publish(&self, envelope: NotificationEnvelope) -> Result<(), anyhow::Error> {
        // A lagging/absent receiver is not an error: notifications are
        // non-critical per spec.md §4.D item 5.
        let _ = self.sender.send(envelope);
        Ok(())
    }
}
