//! Explicit order-status state machine.
//!
//! Modeled directly on `mqk-execution::oms::state_machine::OmsOrder::apply`:
//! transitions are matched exhaustively over `(state, event)` tuples and an
//! illegal transition returns a typed error the caller must treat as a halt
//! signal, rather than dispatching on an `action` string (REDESIGN FLAGS,
//! spec.md §9: "Dynamic dispatch on `action` strings inside handlers").

use serde::{Deserialize, Serialize};

/// spec.md §3: `PENDING → INVENTORY_RESERVED → PAYMENT_CHARGED → CONFIRMED`
/// or any of these → `COMPENSATING → FAILED`. `CONFIRMED` and `FAILED` are
/// terminal; `PENDING` and `COMPENSATING` are transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    InventoryReserved,
    PaymentCharged,
    Confirmed,
    Compensating,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
    }
}

/// Events that drive status transitions. One per DAG edge in spec.md §4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTransition {
    ReserveInventory,
    ChargePayment,
    Confirm,
    BeginCompensation,
    Fail,
}

/// Returned when a transition cannot legally be applied from the current
/// status. Callers MUST treat this as a halt/alert condition — it indicates
/// the orchestrator's own bookkeeping has diverged from the status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: OrderStatus,
    pub transition: OrderTransition,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal order status transition: {:?} + {:?}",
            self.from, self.transition
        )
    }
}

impl std::error::Error for IllegalTransition {}

impl OrderStatus {
    /// Apply a transition, returning the new status or `IllegalTransition`.
    ///
    /// Status never regresses on the happy path; the only permitted
    /// "regression" is into `COMPENSATING` (spec.md §5 ordering guarantees).
    pub fn apply(self, transition: OrderTransition) -> Result<OrderStatus, IllegalTransition> {
        use OrderStatus::*;
        use OrderTransition::*;

        let next = match (self, transition) {
            (Pending, ReserveInventory) => InventoryReserved,
            (InventoryReserved, ChargePayment) => PaymentCharged,
            (PaymentCharged, Confirm) => Confirmed,

            // BeginCompensation is reachable from any non-terminal status —
            // a failure can be discovered at any point in the forward chain.
            (Pending | InventoryReserved | PaymentCharged, BeginCompensation) => Compensating,

            // Fail is reachable directly from Pending (Reserve failed before
            // any side effect — no compensation needed) or from Compensating
            // once compensating actions have run.
            (Pending, Fail) => Failed,
            (Compensating, Fail) => Failed,

            (from, transition) => return Err(IllegalTransition { from, transition }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let s = OrderStatus::Pending;
        let s = s.apply(OrderTransition::ReserveInventory).unwrap();
        assert_eq!(s, OrderStatus::InventoryReserved);
        let s = s.apply(OrderTransition::ChargePayment).unwrap();
        assert_eq!(s, OrderStatus::PaymentCharged);
        let s = s.apply(OrderTransition::Confirm).unwrap();
        assert_eq!(s, OrderStatus::Confirmed);
        assert!(s.is_terminal());
    }

    #[test]
    fn reserve_failure_goes_straight_to_failed() {
        let s = OrderStatus::Pending.apply(OrderTransition::Fail).unwrap();
        assert_eq!(s, OrderStatus::Failed);
    }

    #[test]
    fn charge_failure_compensates_then_fails() {
        let s = OrderStatus::Pending
            .apply(OrderTransition::ReserveInventory)
            .unwrap();
        let s = s.apply(OrderTransition::BeginCompensation).unwrap();
        assert_eq!(s, OrderStatus::Compensating);
        let s = s.apply(OrderTransition::Fail).unwrap();
        assert_eq!(s, OrderStatus::Failed);
    }

    #[test]
    fn illegal_transition_from_terminal_state_is_rejected() {
        let s = OrderStatus::Confirmed;
        let err = s.apply(OrderTransition::Fail).unwrap_err();
        assert_eq!(err.from, OrderStatus::Confirmed);
    }

    #[test]
    fn cannot_skip_charge_before_reserve() {
        let err = OrderStatus::Pending
            .apply(OrderTransition::ChargePayment)
            .unwrap_err();
        assert_eq!(err.from, OrderStatus::Pending);
    }
}
