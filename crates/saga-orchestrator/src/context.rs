//! `SagaContext` — spec.md §4.E: flows through the steps, each step is pure
//! with respect to this context plus the external store, appending its own
//! output fields and returning the new context.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use saga_schemas::OrderItem;

#[derive(Debug, Clone)]
pub struct SagaContext {
    pub order_id: String,
    pub customer_id: String,
    pub total_cents: i64,
    pub items: Vec<OrderItem>,
    pub correlation_id: String,
    pub reservation_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub deadline: DateTime<Utc>,
}

impl SagaContext {
    pub fn new(
        order_id: String,
        customer_id: String,
        total_cents: i64,
        items: Vec<OrderItem>,
        correlation_id: String,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            total_cents,
            items,
            correlation_id,
            reservation_id: None,
            payment_id: None,
            last_error: None,
            deadline,
        }
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}
