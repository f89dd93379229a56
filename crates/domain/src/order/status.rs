//! Order status transition table.

use common::OrderStatus;

use crate::error::DomainError;

/// Allowed targets of [`OrderService::update_status`](super::OrderService::update_status).
///
/// `completed -> return_requested` is deliberately absent: completed orders
/// re-enter the lifecycle only through the return flow.
pub fn allowed_targets(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;

    match from {
        Pending => &[Processing, Cancelled],
        Processing => &[Shipped, Delivered, Completed, Cancelled],
        Shipped => &[Delivered, Completed],
        Delivered => &[Completed, ReturnRequested],
        ReturnRequested => &[Refunded, Delivered],
        Completed | Cancelled | Refunded => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Statuses from which a return may be requested.
pub fn is_returnable(status: OrderStatus) -> bool {
    matches!(status, OrderStatus::Delivered | OrderStatus::Completed)
}

pub(crate) fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<(), DomainError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(DomainError::InvalidTransition { from, to })
    }
}
