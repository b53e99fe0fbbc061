//! Currency amounts for tariffs, bills, and payments
//!
//! Billing chains several rates over one base (tax, senior discount,
//! penalty). [`Money`] therefore keeps every decimal place through
//! arithmetic; rounding to centavos happens only in
//! [`Money::round_to_currency`] and `Display`.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ISO 4217 currency of an amount
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Philippine peso, the tariff currency
    #[default]
    PHP,
    USD,
}

impl Currency {
    /// Digits after the decimal point in the minor unit
    pub fn minor_digits(self) -> u32 {
        2
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Currency::PHP => "₱",
            Currency::USD => "$",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::PHP => "PHP",
            Currency::USD => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("expected an amount in {expected}, got {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },
}

/// An exact amount in one currency
///
/// Equality and ordering are numeric, so `191.0` and `191.00` compare equal.
/// Mixing currencies in `+` or `-` is a programming error and panics; use
/// the `checked_` forms at boundaries where foreign amounts can arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: amount.normalize(),
            currency,
        }
    }

    /// Builds an amount from minor units, e.g. centavos
    pub fn from_minor(minor: i64, currency: Currency) -> Self {
        Self::new(Decimal::new(minor, currency.minor_digits()), currency)
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: dec!(0),
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Rounds half away from zero to the currency's minor unit
    pub fn round_to_currency(&self) -> Self {
        let rounded = self
            .amount
            .round_dp_with_strategy(self.currency.minor_digits(), RoundingStrategy::MidpointAwayFromZero);
        Self::new(rounded, self.currency)
    }

    /// Fails unless `other` is in the same currency
    pub fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(MoneyError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            })
        }
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(Self::new(self.amount + other.amount, self.currency))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(Self::new(self.amount - other.amount, self.currency))
    }

    /// Adds up amounts in `currency`; an empty sequence is zero in that
    /// currency
    pub fn total<I>(currency: Currency, amounts: I) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(&m))
    }

    pub fn min(self, other: Money) -> Money {
        if other.amount < self.amount {
            other
        } else {
            self
        }
    }

    pub fn max(self, other: Money) -> Money {
        if other.amount > self.amount {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.currency.minor_digits() as usize;
        write!(
            f,
            "{} {:.*}",
            self.currency.symbol(),
            digits,
            self.round_to_currency().amount
        )
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency == other.currency {
            self.amount.partial_cmp(&other.amount)
        } else {
            None
        }
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        match self.checked_add(&other) {
            Ok(sum) => sum,
            Err(e) => panic!("Money addition: {e}"),
        }
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        match self.checked_sub(&other) {
            Ok(difference) => difference,
            Err(e) => panic!("Money subtraction: {e}"),
        }
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.amount, self.currency)
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;

    fn mul(self, factor: Decimal) -> Self {
        Self::new(self.amount * factor, self.currency)
    }
}

/// A fraction applied to an amount: tax, discount, or penalty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(Decimal);

impl Rate {
    /// `0.02` means two percent
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn from_percentage(percent: Decimal) -> Self {
        Self(percent / dec!(100))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// True for rates in `[0, 1]`
    pub fn is_fraction(&self) -> bool {
        (Decimal::ZERO..=Decimal::ONE).contains(&self.0)
    }

    pub fn apply(&self, money: &Money) -> Money {
        *money * self.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", (self.0 * dec!(100)).round_dp(4).normalize())
    }
}
