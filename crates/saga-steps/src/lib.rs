//! Step Executors — spec.md §4.D.
//!
//! Each function here is the Rust analogue of one
//! `original_source/services/*_service/handler.py` action: a pure
//! `(input) -> StepOutcome<T>` shape, idempotent by construction (every
//! executor wraps its body in `saga_idempotency::IdempotencyRegistry`),
//! returning business failures as data (`StepOutcome::Business`) and
//! letting infrastructure failures propagate as `anyhow::Error` so the
//! orchestrator's retry loop can see them.

mod charge;
mod notify;
mod providers;
mod refund;
mod release;
mod reserve;

pub use charge::{charge, ChargeInput};
pub use notify::notify;
pub use providers::{
    ChargeRequest, ChargeResult, InMemoryBus, NotificationBus, PaymentProvider, ProviderError,
    RefundRequest, SimulatedPaymentProvider,
};
pub use refund::refund;
pub use release::release;
pub use reserve::{reserve, ReserveInput};
