//! Fixed-point currency amounts.

use serde::{Deserialize, Serialize};

/// Money amount held as integer cents so totals never drift.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money { cents: 0 };

    /// Creates an amount from cents (1000 = $10.00).
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates an amount from whole dollars.
    pub const fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars * 100,
        }
    }

    /// Returns the amount in cents.
    pub const fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the whole-dollar portion.
    pub const fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents remainder after whole dollars.
    pub const fn cents_part(&self) -> i64 {
        (self.cents % 100).abs()
    }

    pub const fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub const fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Price of `quantity` units at this unit price.
    pub fn times(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents * i64::from(quantity),
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        write!(
            f,
            "{sign}${}.{:02}",
            self.dollars().abs(),
            self.cents_part()
        )
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents - rhs.cents,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.cents += rhs.cents;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}
