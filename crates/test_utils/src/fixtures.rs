//! Known figures from the standard PHP tariff, plus stock accounts and
//! dates

use chrono::NaiveDate;
use core_kernel::{Currency, Money};
use domain_billing::{BillingPeriod, CustomerAccount};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Shorthand for a PHP amount
pub fn php(amount: Decimal) -> Money {
    Money::new(amount, Currency::PHP)
}

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// Total due for 5 m³, non-senior
    pub fn five_cubic_total() -> Money {
        php(dec!(214.302))
    }

    /// Total due for 25 m³, senior
    pub fn twenty_five_cubic_senior_total() -> Money {
        php(dec!(566.52585))
    }

    /// A USD amount for currency mismatch tests
    pub fn usd_100() -> Money {
        Money::new(dec!(100.00), Currency::USD)
    }
}

/// Fixture for billing dates
pub struct DateFixtures;

impl DateFixtures {
    /// Last day of the given month
    pub fn period_end(year: i32, month: u32) -> NaiveDate {
        let period = BillingPeriod::new(year, month).expect("month in range");
        let next = period.next();
        NaiveDate::from_ymd_opt(next.year, next.month, 1)
            .and_then(|d| d.pred_opt())
            .expect("valid date")
    }

    /// A payment date inside January 2024
    pub fn payment_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
    }
}

/// Fixture for customer accounts
pub struct AccountFixtures;

impl AccountFixtures {
    /// An active, non-senior account
    pub fn regular() -> CustomerAccount {
        CustomerAccount::new("0001-001", "Juan Dela Cruz")
    }

    /// An active senior-citizen account
    pub fn senior() -> CustomerAccount {
        CustomerAccount::new("0001-002", "Lola Basyang").senior()
    }

    /// `count` regular accounts with distinct numbers
    pub fn many(count: usize) -> Vec<CustomerAccount> {
        (0..count)
            .map(|i| CustomerAccount::new(format!("0002-{:03}", i), format!("Customer {}", i)))
            .collect()
    }
}
