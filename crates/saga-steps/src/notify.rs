//! Notify — spec.md §4.D item 5.
//!
//! Grounded in `original_source/services/notification_service/handler.py`:
//! publishes a structured envelope, idempotent per envelope identity
//! (`order_id` + `notification_type`, per spec.md §6), and failures are
//! non-critical — they never affect order status.

use std::sync::Arc;

use saga_idempotency::IdempotencyRegistry;
use saga_schemas::{NotificationEnvelope, NotificationType, StepOutcome};

use crate::providers::NotificationBus;

pub async fn notify(
    bus: &Arc<dyn NotificationBus>,
    idempotency: &IdempotencyRegistry,
    envelope: NotificationEnvelope,
) -> Result<StepOutcome<()>, anyhow::Error> {
    let type_tag = match envelope.notification_type {
        NotificationType::OrderConfirmed => "confirmed",
        NotificationType::OrderFailed => "failed",
    };
    let key = format!("notify-{}-{type_tag}", envelope.order_id);
    let bus = bus.clone();

    idempotency
        .execute(&key, || async move {
            bus.publish(envelope).await?;
            Ok(StepOutcome::Success(()))
        })
        .await
        .map_err(anyhow::Error::from)
}
