use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a UUID-backed identifier newtype.
///
/// Each identifier is its own type so a cart ID can never be passed where a
/// product ID is expected.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Authenticated user, as supplied by the authentication collaborator.
    UserId
}

uuid_id! {
    /// A user's shopping cart. Each user owns at most one.
    CartId
}

uuid_id! {
    /// A single (product, quantity) line within a cart.
    CartLineId
}

uuid_id! {
    /// Catalog product whose stock is tracked by the inventory ledger.
    ProductId
}

uuid_id! {
    /// A persisted order.
    OrderId
}

uuid_id! {
    /// Line snapshot within an order.
    OrderLineId
}

uuid_id! {
    /// Payment record owned by the payment collaborator.
    PaymentId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_unique_ids() {
        assert_ne!(ProductId::new(), ProductId::new());
        assert_ne!(CartId::new(), CartId::new());
    }

    #[test]
    fn from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = OrderId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
        assert_eq!(Uuid::from(id), uuid);
    }

    #[test]
    fn display_matches_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(UserId::from(uuid).to_string(), uuid.to_string());
    }

    #[test]
    fn serializes_transparently() {
        let id = CartLineId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let back: CartLineId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
