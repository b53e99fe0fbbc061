//! Builders for readings, bills, and payments
//!
//! Defaults describe January 2024 and 5 m³ of water, the tariff's first
//! worked example.

use chrono::{NaiveDate, Utc};
use core_kernel::{AccountId, BillId, Money};
use domain_billing::bill::{bill_number, status_for};
use domain_billing::{Bill, BillingPeriod, ChargeCalculator, MeterReading, Payment, PaymentStatus};
use rust_decimal::Decimal;

use crate::fixtures::{php, DateFixtures};

/// Builder for meter readings
#[derive(Debug, Clone)]
pub struct ReadingBuilder {
    account_id: AccountId,
    previous_value: u64,
    current_value: u64,
    year: i32,
    month: u32,
}

impl ReadingBuilder {
    /// January 2024, 5 m³ consumed
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            previous_value: 100,
            current_value: 105,
            year: 2024,
            month: 1,
        }
    }

    /// Sets both meter values
    pub fn with_values(mut self, previous: u64, current: u64) -> Self {
        self.previous_value = previous;
        self.current_value = current;
        self
    }

    /// Sets the billing month
    ///
    /// The month is not validated, so out-of-range months can be built.
    pub fn for_period(mut self, year: i32, month: u32) -> Self {
        self.year = year;
        self.month = month;
        self
    }

    /// Builds the reading
    pub fn build(self) -> MeterReading {
        // Out-of-range months still need some date to carry.
        let end_month = if (1..=12).contains(&self.month) { self.month } else { 1 };
        let period_end = DateFixtures::period_end(self.year, end_month);
        MeterReading {
            account_id: self.account_id,
            previous_value: self.previous_value,
            current_value: self.current_value,
            period_end,
            month: self.month,
            year: self.year,
        }
    }
}

/// Consecutive monthly readings for one account, each continuing from the
/// last meter value
pub fn monthly_readings(
    account_id: AccountId,
    start: BillingPeriod,
    consumptions: &[u64],
) -> Vec<MeterReading> {
    let mut period = start;
    let mut meter = 0;
    consumptions
        .iter()
        .map(|&used| {
            let reading = ReadingBuilder::new(account_id)
                .with_values(meter, meter + used)
                .for_period(period.year, period.month)
                .build();
            meter += used;
            period = period.next();
            reading
        })
        .collect()
}

/// Builder for bill documents written straight to a store
///
/// Useful for setting up outstanding balances that no tariff produces.
#[derive(Debug, Clone)]
pub struct BillBuilder {
    account_id: AccountId,
    sequence_number: u64,
    original_amount: Money,
}

impl BillBuilder {
    /// Bill number `sequence_number` for `amount`, nothing paid
    pub fn new(account_id: AccountId, sequence_number: u64, amount: Decimal) -> Self {
        Self {
            account_id,
            sequence_number,
            original_amount: php(amount),
        }
    }

    /// Builds the bill; sequence 1 is January 2024
    pub fn build(self) -> Bill {
        let months = self.sequence_number.saturating_sub(1) as u32;
        let period = BillingPeriod {
            year: 2024 + (months / 12) as i32,
            month: months % 12 + 1,
        };
        let zero = Money::zero(self.original_amount.currency());
        let now = Utc::now();
        Bill {
            id: BillId::new(),
            account_id: self.account_id,
            sequence_number: self.sequence_number,
            bill_number: bill_number(self.sequence_number),
            billing_period: period,
            due_date: DateFixtures::period_end(period.year, period.month),
            previous_reading: 0,
            current_reading: 0,
            consumption: 0,
            charge: ChargeCalculator::standard(self.original_amount.currency()).compute(0, false),
            arrears_at_issue: zero,
            overpayment_applied: zero,
            payable_before_penalty: self.original_amount,
            penalty_due: zero,
            remaining_amount: self.original_amount,
            original_amount: self.original_amount,
            adjustments_total: zero,
            status: status_for(self.original_amount, self.original_amount),
            issued_at: now,
            updated_at: now,
        }
    }
}

/// Builder for payments
#[derive(Debug, Clone)]
pub struct PaymentBuilder {
    account_id: AccountId,
    amount: Money,
    reference_number: String,
    payment_date: NaiveDate,
    status: PaymentStatus,
}

impl PaymentBuilder {
    /// A verified payment with a fresh reference number
    pub fn new(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            account_id,
            amount: php(amount),
            reference_number: format!("REF-{}", core_kernel::PaymentId::new()),
            payment_date: DateFixtures::payment_date(),
            status: PaymentStatus::Verified,
        }
    }

    /// Sets the reference number
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_number = reference.into();
        self
    }

    /// Sets the amount, currency included
    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = amount;
        self
    }

    /// Sets the verification status
    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = status;
        self
    }

    /// Builds the payment
    pub fn build(self) -> Payment {
        Payment::verified(self.account_id, self.amount, self.reference_number, self.payment_date)
            .with_status(self.status)
    }
}
