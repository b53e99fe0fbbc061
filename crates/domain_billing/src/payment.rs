//! Payments and their application records
//!
//! Payments arrive already verified (or rejected) by the cashier. The
//! [`PaymentApplication`] record is written in the same unit as the bills it
//! touched and is what makes re-processing a reference number a no-op.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, BillId, Money, PaymentId};

/// Payment verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting verification
    Pending,
    /// Verified and ready to apply
    Verified,
    /// Rejected during verification
    Rejected,
}

/// A payment record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier
    pub id: PaymentId,
    /// Account being paid
    pub account_id: AccountId,
    /// Amount paid
    pub amount: Money,
    /// Receipt or bank reference; one application per reference
    pub reference_number: String,
    /// Date the payment was made
    pub payment_date: NaiveDate,
    /// Verification status
    pub status: PaymentStatus,
}

impl Payment {
    /// Creates a verified payment
    pub fn verified(
        account_id: AccountId,
        amount: Money,
        reference_number: impl Into<String>,
        payment_date: NaiveDate,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            account_id,
            amount,
            reference_number: reference_number.into(),
            payment_date,
            status: PaymentStatus::Verified,
        }
    }

    /// Returns the payment with another status
    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = status;
        self
    }
}

/// The part of a payment that went to one bill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub bill_id: BillId,
    pub sequence_number: u64,
    pub amount: Money,
}

/// Whether an application record stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    /// The payment is reflected in the bills and ledger
    Committed,
    /// The write failed and was undone; the payment may be retried
    RolledBack,
}

/// How a payment was spread across an account's bills
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentApplication {
    /// Idempotency key
    pub reference_number: String,
    pub payment_id: PaymentId,
    pub account_id: AccountId,
    pub amount: Money,
    /// Per-bill amounts, oldest bill first
    pub allocations: Vec<PaymentAllocation>,
    /// What was left after every bill was settled
    pub excess_to_pool: Money,
    pub state: ApplicationState,
    pub applied_at: DateTime<Utc>,
}

impl PaymentApplication {
    /// Returns true if the payment already counts against the ledger
    pub fn is_committed(&self) -> bool {
        self.state == ApplicationState::Committed
    }

    /// Sum of the per-bill allocations
    pub fn allocated(&self) -> Money {
        self.allocations
            .iter()
            .fold(Money::zero(self.amount.currency()), |acc, a| acc + a.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(ApplicationState::RolledBack).unwrap();
        assert_eq!(json, "rolled_back");
        let json = serde_json::to_value(PaymentStatus::Verified).unwrap();
        assert_eq!(json, "verified");
    }

    #[test]
    fn test_allocated_sums_allocations() {
        let php = |d| Money::new(d, Currency::PHP);
        let application = PaymentApplication {
            reference_number: "OR-1001".into(),
            payment_id: PaymentId::new(),
            account_id: AccountId::new(),
            amount: php(dec!(120)),
            allocations: vec![
                PaymentAllocation { bill_id: BillId::new(), sequence_number: 1, amount: php(dec!(50)) },
                PaymentAllocation { bill_id: BillId::new(), sequence_number: 2, amount: php(dec!(30)) },
            ],
            excess_to_pool: php(dec!(40)),
            state: ApplicationState::Committed,
            applied_at: Utc::now(),
        };
        assert_eq!(application.allocated(), php(dec!(80)));
        assert!(application.is_committed());
    }
}
