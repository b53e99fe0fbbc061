//! Bills
//!
//! A bill is issued once per account and billing period and is never
//! deleted. Its `original_amount` is fixed at issue; `remaining_amount` only
//! goes down, through payments or credit adjustments.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, BillId, Money};
use crate::charges::ChargeBreakdown;
use crate::error::BillingError;
use crate::reading::BillingPeriod;

/// Bill payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    /// Nothing paid yet
    Pending,
    /// Some of the amount is still owed
    PartiallyPaid,
    /// Nothing is owed
    Paid,
}

/// A water bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub id: BillId,
    pub account_id: AccountId,
    /// Strictly increasing per account, starting at 1
    pub sequence_number: u64,
    /// Zero-padded rendering of the sequence number
    pub bill_number: String,
    pub billing_period: BillingPeriod,
    pub due_date: NaiveDate,
    pub previous_reading: u64,
    pub current_reading: u64,
    pub consumption: u64,
    /// Charges before any overpayment was absorbed
    pub charge: ChargeBreakdown,
    /// Sum of what prior bills still owed when this one was issued
    pub arrears_at_issue: Money,
    /// Amount drawn from the overpayment pool
    pub overpayment_applied: Money,
    /// Pre-penalty subtotal after the overpayment
    pub payable_before_penalty: Money,
    /// Penalty on the reduced base
    pub penalty_due: Money,
    /// What the customer still owes on this bill
    pub remaining_amount: Money,
    /// What the bill was issued for
    pub original_amount: Money,
    /// Sum of credit adjustments taken off this bill
    pub adjustments_total: Money,
    pub status: BillStatus,
    pub issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Renders a sequence number the way it is printed on bills
pub fn bill_number(sequence_number: u64) -> String {
    format!("{:06}", sequence_number)
}

impl Bill {
    /// Returns true while something is owed on the bill
    pub fn is_outstanding(&self) -> bool {
        self.remaining_amount.is_positive()
    }

    /// Takes up to `available` off the remaining amount and returns what was
    /// taken
    pub fn apply_payment(&mut self, available: Money) -> Result<Money, BillingError> {
        if !available.is_positive() || !self.is_outstanding() {
            return Ok(Money::zero(self.remaining_amount.currency()));
        }
        let applied = available.min(self.remaining_amount);
        self.set_remaining(self.remaining_amount - applied)?;
        Ok(applied)
    }

    /// Takes a credit adjustment off the remaining amount
    ///
    /// Returns the part that reduced this bill; the rest of `amount` is
    /// left for the caller to credit elsewhere.
    pub fn apply_credit(&mut self, amount: Money) -> Result<Money, BillingError> {
        let applied = self.apply_payment(amount)?;
        self.adjustments_total = self.adjustments_total + applied;
        Ok(applied)
    }

    fn set_remaining(&mut self, remaining: Money) -> Result<(), BillingError> {
        debug_assert!(!remaining.is_negative(), "remaining amount went negative on bill {}", self.id);
        if remaining.is_negative() {
            return Err(BillingError::InvariantViolation(format!(
                "remaining amount of bill {} would become {}",
                self.id,
                remaining.amount()
            )));
        }
        self.remaining_amount = remaining;
        self.status = status_for(remaining, self.original_amount);
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Status implied by an amount still owed
pub fn status_for(remaining: Money, original: Money) -> BillStatus {
    if !remaining.is_positive() {
        BillStatus::Paid
    } else if remaining < original {
        BillStatus::PartiallyPaid
    } else {
        BillStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    fn php(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::PHP)
    }

    fn bill_owing(amount: rust_decimal::Decimal) -> Bill {
        let zero = Money::zero(Currency::PHP);
        let breakdown = ChargeBreakdown {
            water_charge: zero,
            tax: zero,
            senior_discount: zero,
            penalty: zero,
            subtotal_before_penalty: zero,
            total_due: zero,
        };
        let now = Utc::now();
        Bill {
            id: BillId::new(),
            account_id: AccountId::new(),
            sequence_number: 1,
            bill_number: bill_number(1),
            billing_period: BillingPeriod { year: 2024, month: 1 },
            due_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            previous_reading: 0,
            current_reading: 10,
            consumption: 10,
            charge: breakdown,
            arrears_at_issue: zero,
            overpayment_applied: zero,
            payable_before_penalty: php(amount),
            penalty_due: zero,
            remaining_amount: php(amount),
            original_amount: php(amount),
            adjustments_total: zero,
            status: BillStatus::Pending,
            issued_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_bill_number_is_zero_padded() {
        assert_eq!(bill_number(7), "000007");
        assert_eq!(bill_number(123456), "123456");
    }

    #[test]
    fn test_partial_then_full_payment() {
        let mut bill = bill_owing(dec!(30));

        assert_eq!(bill.apply_payment(php(dec!(20))).unwrap(), php(dec!(20)));
        assert_eq!(bill.status, BillStatus::PartiallyPaid);
        assert_eq!(bill.remaining_amount, php(dec!(10)));

        assert_eq!(bill.apply_payment(php(dec!(50))).unwrap(), php(dec!(10)));
        assert_eq!(bill.status, BillStatus::Paid);
        assert!(bill.remaining_amount.is_zero());
        assert_eq!(bill.original_amount, php(dec!(30)));
    }

    #[test]
    fn test_paid_bill_takes_nothing() {
        let mut bill = bill_owing(dec!(0));
        assert!(bill.apply_payment(php(dec!(5))).unwrap().is_zero());
    }

    #[test]
    fn test_credit_tracks_adjustments_total() {
        let mut bill = bill_owing(dec!(100));
        let applied = bill.apply_credit(php(dec!(150))).unwrap();
        assert_eq!(applied, php(dec!(100)));
        assert_eq!(bill.adjustments_total, php(dec!(100)));
        assert_eq!(bill.status, BillStatus::Paid);
    }

    #[test]
    fn test_status_for() {
        assert_eq!(status_for(php(dec!(0)), php(dec!(10))), BillStatus::Paid);
        assert_eq!(status_for(php(dec!(4)), php(dec!(10))), BillStatus::PartiallyPaid);
        assert_eq!(status_for(php(dec!(10)), php(dec!(10))), BillStatus::Pending);
    }
}
