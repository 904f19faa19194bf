//! Wire/domain types for the order saga: `Order`, `OrderEvent`, `Reservation`,
//! `Payment`, `Product`, `IdempotencyRecord`, `BreakerRecord`, the
//! `CreateOrder` command and the outbound notification envelope.
//!
//! This crate has no I/O. Every other crate in the workspace depends on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod clock;
pub mod status;

pub use clock::{Clock, SystemClock};
pub use status::{IllegalTransition, OrderStatus, OrderTransition};

// ---------------------------------------------------------------------------
// Order / OrderItem / OrderEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl OrderItem {
    /// `total_cents` is always derived, never stored independently — see
    /// spec.md §3's "never floating-point" invariant.
    pub fn line_total_cents(&self) -> i64 {
        self.quantity * self.unit_price_cents
    }
}

pub fn total_cents(items: &[OrderItem]) -> i64 {
    items.iter().map(OrderItem::line_total_cents).sum()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub correlation_id: String,
    /// Monotonic optimistic-concurrency counter; bumped on every store write.
    pub version: i64,
    /// Per-order monotonic counter for event-log sequence numbers. Combined
    /// with a microsecond timestamp in the sort key so that two events
    /// produced within the same microsecond never collide (REDESIGN FLAGS,
    /// spec.md §9: "Monotonic sort keys based on microseconds").
    pub event_seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        order_id: String,
        customer_id: String,
        items: Vec<OrderItem>,
        correlation_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        let total = total_cents(&items);
        Self {
            order_id,
            customer_id,
            items,
            total_cents: total,
            status: OrderStatus::Pending,
            correlation_id,
            version: 0,
            event_seq: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub sequence: i64,
    pub status_at_time: OrderStatus,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Active,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: Uuid,
    pub order_id: String,
    pub items: Vec<OrderItem>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Charged,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: Uuid,
    pub order_id: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub provider_charge_id: String,
    pub status: PaymentStatus,
}

// ---------------------------------------------------------------------------
// Product / Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Idempotency record (wire shape; saga-idempotency owns the protocol)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    InFlight,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: IdempotencyStatus,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Breaker record (wire shape; saga-breaker owns the protocol)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub name: String,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub resets_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Inbound command / outbound query shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderCommand {
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
    pub order: Order,
    pub event_log: Vec<OrderEvent>,
}

// ---------------------------------------------------------------------------
// Outbound notification envelope (message bus body, spec.md §6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    OrderConfirmed,
    OrderFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub notification_type: NotificationType,
    pub order_id: String,
    pub customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Structured step-result contract (spec.md §4.D, §7)
// ---------------------------------------------------------------------------

/// The closed set of business-level failure kinds a step executor can
/// return. Infrastructure failures never appear here — they propagate as
/// `anyhow::Error` so the orchestrator's retry loop can see them (spec.md §7
/// propagation policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessFailureKind {
    InsufficientStock,
    PaymentDeclined,
    PaymentProviderUnavailable,
    /// A step's infrastructure retries were exhausted (max attempts or the
    /// saga deadline passed) before it produced a result. Per spec.md §5 the
    /// orchestrator treats this exhaustion as business-level and proceeds to
    /// compensation rather than retrying forever.
    RetriesExhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessFailure {
    pub kind: BusinessFailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
}

/// Every step executor returns `Result<StepOutcome<T>, anyhow::Error>`: the
/// `Ok` arm carries a business-level outcome (success or a named failure
/// kind, per the taxonomy above); the `Err` arm is reserved for
/// infrastructure exceptions the orchestrator retries. This is the tagged
/// sum-type result REDESIGN FLAGS calls for in place of exception-based
/// control flow for business outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome<T> {
    Success(T),
    Business(BusinessFailure),
}

impl<T> StepOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success(_))
    }
}

// ---------------------------------------------------------------------------
// Inbound validation error taxonomy (spec.md §7 — crosses the core boundary)
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required idempotency_key")]
    MissingIdempotencyKey,
    #[error("validation failed: {0}")]
    Invalid(String),
}
