//! Human-readable order numbers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Builds `ORD-<unix seconds>-<8 hex chars>`.
///
/// Collisions are unlikely but possible; the store's uniqueness constraint is
/// the authoritative guarantee.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", now.timestamp(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_format() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let number = generate_order_number(now);

        let parts: Vec<_> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1], "1700000000");
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn order_numbers_differ() {
        let now = Utc::now();
        assert_ne!(generate_order_number(now), generate_order_number(now));
    }
}
