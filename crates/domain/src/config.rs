//! Checkout configuration loaded from environment variables.

use std::time::Duration;

/// Longer holds are treated as misconfiguration. One year.
const MAX_RESERVATION_TTL_MINUTES: u64 = 365 * 24 * 60;

/// Tunables for the cart and order services.
///
/// Reads from environment variables:
/// - `STOCK_RESERVATION_TTL_MINUTES`: lifetime of a stock hold (default: `10`, at most one year)
/// - `ORDER_NUMBER_ATTEMPTS`: tries before giving up on a colliding order number (default: `3`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub reservation_ttl: Duration,
    pub order_number_attempts: u32,
}

impl CheckoutConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let reservation_ttl = lookup("STOCK_RESERVATION_TTL_MINUTES")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|minutes| (1..=MAX_RESERVATION_TTL_MINUTES).contains(minutes))
            .and_then(|minutes| minutes.checked_mul(60))
            .map(Duration::from_secs)
            .unwrap_or(defaults.reservation_ttl);

        let order_number_attempts = lookup("ORDER_NUMBER_ATTEMPTS")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|attempts| *attempts > 0)
            .unwrap_or(defaults.order_number_attempts);

        Self {
            reservation_ttl,
            order_number_attempts,
        }
    }

    /// Reservation lifetime as a chrono delta, for computing expiry instants.
    pub fn reservation_ttl_delta(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::from_std(self.reservation_ttl)
            .unwrap_or_else(|_| chrono::TimeDelta::minutes(10))
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(10 * 60),
            order_number_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = CheckoutConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config, CheckoutConfig::default());
        assert_eq!(config.reservation_ttl, Duration::from_secs(600));
        assert_eq!(config.order_number_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = CheckoutConfig::from_lookup(lookup_from(&[
            ("STOCK_RESERVATION_TTL_MINUTES", "15"),
            ("ORDER_NUMBER_ATTEMPTS", "5"),
        ]));
        assert_eq!(config.reservation_ttl, Duration::from_secs(900));
        assert_eq!(config.order_number_attempts, 5);
        assert_eq!(config.reservation_ttl_delta(), chrono::TimeDelta::minutes(15));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = CheckoutConfig::from_lookup(lookup_from(&[
            ("STOCK_RESERVATION_TTL_MINUTES", "soon"),
            ("ORDER_NUMBER_ATTEMPTS", "0"),
        ]));
        assert_eq!(config, CheckoutConfig::default());
    }

    #[test]
    fn test_oversized_ttl_falls_back() {
        for minutes in ["307445734561825862", "18446744073709551615", "525601"] {
            let config = CheckoutConfig::from_lookup(lookup_from(&[(
                "STOCK_RESERVATION_TTL_MINUTES",
                minutes,
            )]));
            assert_eq!(config.reservation_ttl, Duration::from_secs(600), "{minutes}");
        }

        let config = CheckoutConfig::from_lookup(lookup_from(&[(
            "STOCK_RESERVATION_TTL_MINUTES",
            "525600",
        )]));
        assert_eq!(config.reservation_ttl, Duration::from_secs(525_600 * 60));
    }
}
