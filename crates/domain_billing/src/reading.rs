//! Meter readings and billing periods

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use core_kernel::AccountId;
use crate::error::BillingError;

/// A calendar month that bills are issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub year: i32,
    pub month: u32,
}

impl BillingPeriod {
    /// Creates a period, rejecting months outside 1-12
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Returns the following month
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One month's meter reading for an account, as captured in the field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterReading {
    pub account_id: AccountId,
    pub previous_value: u64,
    pub current_value: u64,
    /// End of the billing period; the bill falls due from here
    pub period_end: NaiveDate,
    pub month: u32,
    pub year: i32,
}

impl MeterReading {
    /// Cubic meters consumed since the previous reading
    ///
    /// A meter running backwards is a data error, never a negative bill.
    pub fn consumption(&self) -> Result<u64, BillingError> {
        self.current_value
            .checked_sub(self.previous_value)
            .ok_or_else(|| {
                BillingError::invalid_reading(
                    &self.account_id,
                    format!(
                        "current value {} is below previous value {}",
                        self.current_value, self.previous_value
                    ),
                )
            })
    }

    /// The billing period this reading closes
    pub fn billing_period(&self) -> Result<BillingPeriod, BillingError> {
        BillingPeriod::new(self.year, self.month).ok_or_else(|| {
            BillingError::invalid_reading(&self.account_id, format!("month {} is out of range", self.month))
        })
    }

    /// Checks the reading and returns its period and consumption
    pub fn validate(&self) -> Result<(BillingPeriod, u64), BillingError> {
        Ok((self.billing_period()?, self.consumption()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(previous: u64, current: u64, month: u32) -> MeterReading {
        MeterReading {
            account_id: AccountId::new(),
            previous_value: previous,
            current_value: current,
            period_end: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            month,
            year: 2024,
        }
    }

    #[test]
    fn test_consumption() {
        assert_eq!(reading(100, 125, 3).consumption().unwrap(), 25);
        assert_eq!(reading(100, 100, 3).consumption().unwrap(), 0);
    }

    #[test]
    fn test_backwards_meter_is_invalid() {
        let err = reading(125, 100, 3).consumption().unwrap_err();
        assert!(matches!(err, BillingError::InvalidReading { .. }));
    }

    #[test]
    fn test_month_out_of_range_is_invalid() {
        assert!(reading(1, 2, 0).validate().is_err());
        assert!(reading(1, 2, 13).validate().is_err());
        assert_eq!(
            reading(1, 2, 12).validate().unwrap(),
            (BillingPeriod { year: 2024, month: 12 }, 1)
        );
    }

    #[test]
    fn test_period_display_and_next() {
        let period = BillingPeriod::new(2024, 12).unwrap();
        assert_eq!(period.to_string(), "2024-12");
        assert_eq!(period.next().to_string(), "2025-01");
    }
}
