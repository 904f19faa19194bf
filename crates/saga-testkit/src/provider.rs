//! A `PaymentProvider` wrapper that counts calls, so scenario tests can
//! assert the breaker's fast-fail never reaches the underlying dependency
//! (spec.md §8 scenario 5).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use saga_steps::{ChargeRequest, ChargeResult, PaymentProvider, ProviderError, RefundRequest};

pub struct CountingProvider {
    inner: Arc<dyn PaymentProvider>,
    charge_calls: AtomicUsize,
    refund_calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(inner: Arc<dyn PaymentProvider>) -> Self {
        Self {
            inner,
            charge_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        }
    }

    pub fn charge_calls(&self) -> usize {
        self.charge_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for CountingProvider {
    async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.charge(req).await
    }

    async fn refund(&self, req: RefundRequest) -> Result<(), ProviderError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.refund(req).await
    }
}
