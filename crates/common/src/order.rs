//! Order vocabulary shared by storage and the order services.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string that does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle status of an order.
///
/// ```text
/// pending ──► processing ──► shipped ──► delivered ──► completed
///    │            │                          │             │
///    └────────────┴──► cancelled             └──► return_requested ──► refunded
/// ```
///
/// The full edge set (including the shortcuts past `shipped`) is the
/// transition table of the order status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    Refunded,
    ReturnRequested,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
        OrderStatus::ReturnRequested,
    ];

    /// Returns true for statuses with no outgoing status update.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Returns true if the customer may still cancel.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Returns the storage/wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::ReturnRequested => "return_requested",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "order status",
                value: s.to_string(),
            })
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "cc")]
    CreditCard,
    #[serde(rename = "dc")]
    DebitCard,
    #[serde(rename = "cod")]
    CashOnDelivery,
}

impl PaymentMethod {
    /// Deferred methods get their payment record on delivery, not at checkout.
    pub fn is_deferred(&self) -> bool {
        matches!(self, PaymentMethod::CashOnDelivery)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "cc",
            PaymentMethod::DebitCard => "dc",
            PaymentMethod::CashOnDelivery => "cod",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cc" => Ok(PaymentMethod::CreditCard),
            "dc" => Ok(PaymentMethod::DebitCard),
            "cod" => Ok(PaymentMethod::CashOnDelivery),
            other => Err(ParseEnumError {
                kind: "payment method",
                value: other.to_string(),
            }),
        }
    }
}

/// Postal address, copied into the order at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub full_name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
    pub phone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "lost".parse::<OrderStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown order status: lost");
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(OrderStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                OrderStatus::Completed,
                OrderStatus::Cancelled,
                OrderStatus::Refunded
            ]
        );
    }

    #[test]
    fn only_pending_and_processing_are_cancellable() {
        assert!(OrderStatus::Pending.is_cancellable());
        assert!(OrderStatus::Processing.is_cancellable());
        assert!(!OrderStatus::Shipped.is_cancellable());
        assert!(!OrderStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::ReturnRequested).unwrap();
        assert_eq!(json, "\"return_requested\"");
    }

    #[test]
    fn payment_method_codes() {
        assert_eq!("cod".parse::<PaymentMethod>().unwrap(), PaymentMethod::CashOnDelivery);
        assert!(PaymentMethod::CashOnDelivery.is_deferred());
        assert!(!PaymentMethod::CreditCard.is_deferred());
        assert!("paypal".parse::<PaymentMethod>().is_err());
        assert_eq!(
            serde_json::to_string(&PaymentMethod::DebitCard).unwrap(),
            "\"dc\""
        );
    }
}
