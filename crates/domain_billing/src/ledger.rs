//! Per-account ledger state
//!
//! The ledger caches what an account's bills and payments add up to: what is
//! owed, what is owed to the customer (the overpayment pool), and where the
//! meter stood at the last bill. It is a materialized view. Every writer
//! patches it under the account lock, and [`LedgerState::recompute`] can
//! rebuild it from the source documents.
//!
//! The books balance when
//!
//! ```text
//! Σ(original + overpayment_applied) − Σ payments − Σ credits
//!     = Σ remaining − overpool
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, Currency, Money};
use crate::adjustment::BillAdjustment;
use crate::bill::Bill;
use crate::error::BillingError;
use crate::reading::BillingPeriod;

/// Meter position at the last issued bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastReading {
    pub value: u64,
    pub billing_period: BillingPeriod,
}

/// Aggregate balances for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub account_id: AccountId,
    /// Owed on bills older than the latest one
    pub arrears: Money,
    /// Owed to the customer, consumed by the next bills
    pub overpool_amount: Money,
    pub last_reading: Option<LastReading>,
    /// Owed across all bills
    pub current_amount_due: Money,
    /// Bills issued so far; the next bill gets `bill_count + 1`
    pub bill_count: u64,
    /// Sum of applied payments, including what went to the pool
    pub total_paid: Money,
    pub updated_at: DateTime<Utc>,
}

impl LedgerState {
    /// Ledger for an account with no bills yet
    pub fn open(account_id: AccountId, currency: Currency) -> Self {
        let zero = Money::zero(currency);
        Self {
            account_id,
            arrears: zero,
            overpool_amount: zero,
            last_reading: None,
            current_amount_due: zero,
            bill_count: 0,
            total_paid: zero,
            updated_at: Utc::now(),
        }
    }

    /// What the account owes net of its pool; negative when in credit
    pub fn net_balance(&self) -> Money {
        self.current_amount_due - self.overpool_amount
    }

    /// Folds a freshly issued bill into the ledger
    pub fn record_bill(&mut self, bill: &Bill) -> Result<(), BillingError> {
        let overpool = self.overpool_amount - bill.overpayment_applied;
        if overpool.is_negative() {
            return Err(BillingError::InvariantViolation(format!(
                "bill {} absorbed {} but the pool held {}",
                bill.id,
                bill.overpayment_applied.amount(),
                self.overpool_amount.amount()
            )));
        }
        self.overpool_amount = overpool;
        self.arrears = self.current_amount_due;
        self.current_amount_due = self.current_amount_due + bill.remaining_amount;
        self.bill_count = self.bill_count.max(bill.sequence_number);
        self.last_reading = Some(LastReading {
            value: bill.current_reading,
            billing_period: bill.billing_period,
        });
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Folds an applied payment into the ledger
    ///
    /// `latest_remaining` is what the newest bill still owes afterwards.
    pub fn record_payment(&mut self, allocated: Money, excess: Money, latest_remaining: Money) {
        self.current_amount_due = self.current_amount_due - allocated;
        self.overpool_amount = self.overpool_amount + excess;
        self.total_paid = self.total_paid + allocated + excess;
        self.arrears = self.current_amount_due - latest_remaining;
        self.updated_at = Utc::now();
    }

    /// Folds a credit adjustment into the ledger
    pub fn record_credit(&mut self, applied_to_bill: Money, credited_to_pool: Money, latest_remaining: Money) {
        self.current_amount_due = self.current_amount_due - applied_to_bill;
        self.overpool_amount = self.overpool_amount + credited_to_pool;
        self.arrears = self.current_amount_due - latest_remaining;
        self.updated_at = Utc::now();
    }

    /// Rebuilds the ledger from the account's bills, credit adjustments, and
    /// the total of its committed payments
    pub fn recompute(
        account_id: AccountId,
        currency: Currency,
        bills: &[Bill],
        adjustments: &[BillAdjustment],
        total_paid: Money,
    ) -> Self {
        let zero = Money::zero(currency);
        let latest = bills.iter().max_by_key(|b| b.sequence_number);

        let current_amount_due = bills.iter().fold(zero, |acc, b| acc + b.remaining_amount);
        let billed = bills
            .iter()
            .fold(zero, |acc, b| acc + b.original_amount + b.overpayment_applied);
        let credited = adjustments.iter().fold(zero, |acc, a| acc + a.amount);

        Self {
            account_id,
            arrears: current_amount_due - latest.map(|b| b.remaining_amount).unwrap_or(zero),
            overpool_amount: current_amount_due - billed + total_paid + credited,
            last_reading: latest.map(|b| LastReading {
                value: b.current_reading,
                billing_period: b.billing_period,
            }),
            current_amount_due,
            bill_count: latest.map(|b| b.sequence_number).unwrap_or(0),
            total_paid,
            updated_at: Utc::now(),
        }
    }

    /// Fields where this ledger disagrees with `expected`
    pub fn drift_from(&self, expected: &LedgerState) -> Vec<LedgerDrift> {
        let mut drift = Vec::new();
        let mut check = |field: &'static str, stored: String, recomputed: String| {
            if stored != recomputed {
                drift.push(LedgerDrift { field, stored, recomputed });
            }
        };

        check("arrears", amount(&self.arrears), amount(&expected.arrears));
        check(
            "overpool_amount",
            amount(&self.overpool_amount),
            amount(&expected.overpool_amount),
        );
        check(
            "current_amount_due",
            amount(&self.current_amount_due),
            amount(&expected.current_amount_due),
        );
        check("bill_count", self.bill_count.to_string(), expected.bill_count.to_string());
        check(
            "last_reading",
            format!("{:?}", self.last_reading),
            format!("{:?}", expected.last_reading),
        );
        check("total_paid", amount(&self.total_paid), amount(&expected.total_paid));
        drift
    }
}

fn amount(money: &Money) -> String {
    money.amount().normalize().to_string()
}

/// One field of a stored ledger that does not match its source documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDrift {
    pub field: &'static str,
    pub stored: String,
    pub recomputed: String,
}

impl fmt::Display for LedgerDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: stored {}, recomputed {}", self.field, self.stored, self.recomputed)
    }
}

/// Left side minus right side of the balance equation; zero when the books
/// balance
pub fn conservation_residual(
    bills: &[Bill],
    adjustments: &[BillAdjustment],
    total_paid: Money,
    overpool: Money,
) -> Money {
    let zero = Money::zero(overpool.currency());
    let billed = bills
        .iter()
        .fold(zero, |acc, b| acc + b.original_amount + b.overpayment_applied);
    let credited = adjustments.iter().fold(zero, |acc, a| acc + a.amount);
    let remaining = bills.iter().fold(zero, |acc, b| acc + b.remaining_amount);

    (billed - total_paid - credited) - (remaining - overpool)
}
