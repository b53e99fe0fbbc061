//! Billing configuration

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use core_kernel::{Currency, Rate};
use crate::charges::ChargeCalculator;
use crate::error::BillingError;
use crate::rate_schedule::{standard_tiers, RateSchedule, RateTier};

/// Tariff and runtime knobs for the billing engines
///
/// Every field has a default, so an empty environment yields the standard
/// residential tariff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Currency bills are issued in
    pub currency: Currency,
    /// Consumption bands
    pub rate_tiers: Vec<RateTier>,
    /// Floor for any nonzero consumption
    pub minimum_charge: Decimal,
    /// Tax on the water charge
    pub tax_rate: Rate,
    /// Discount on the taxed subtotal for senior citizens
    pub senior_discount_rate: Rate,
    /// Penalty on the discounted amount
    pub penalty_rate: Rate,
    /// Days added to the reading's period end to get the due date
    pub due_days: u32,
    /// Unpaid bill count at which a disconnection risk is signalled
    pub disconnection_threshold: usize,
    /// Ceiling on operations per bulk write
    pub max_bulk_operations: usize,
    /// Times failed operations in a bulk write are retried
    pub bulk_write_retries: u32,
    /// Accounts billed concurrently by a batch
    pub max_concurrent_accounts: usize,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: Currency::PHP,
            rate_tiers: standard_tiers(),
            minimum_charge: dec!(191.00),
            tax_rate: Rate::new(dec!(0.02)),
            senior_discount_rate: Rate::new(dec!(0.05)),
            penalty_rate: Rate::new(dec!(0.10)),
            due_days: 0,
            disconnection_threshold: 3,
            max_bulk_operations: 400,
            bulk_write_retries: 2,
            max_concurrent_accounts: 8,
        }
    }
}

impl BillingConfig {
    /// Loads configuration from `BILLING_*` environment variables, reading a
    /// `.env` file first if one exists
    pub fn from_env() -> Result<Self, BillingError> {
        dotenvy::dotenv().ok();

        let config: Self = config::Config::builder()
            .add_source(config::Environment::with_prefix("BILLING").try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no engine can work with
    pub fn validate(&self) -> Result<(), BillingError> {
        for (name, rate) in [
            ("tax_rate", self.tax_rate),
            ("senior_discount_rate", self.senior_discount_rate),
            ("penalty_rate", self.penalty_rate),
        ] {
            if !rate.is_fraction() {
                return Err(BillingError::Configuration(format!(
                    "{} must lie between 0 and 1, got {}",
                    name,
                    rate.as_decimal()
                )));
            }
        }
        if self.disconnection_threshold == 0 {
            return Err(BillingError::Configuration(
                "disconnection_threshold must be at least 1".to_string(),
            ));
        }
        // A bill and its ledger are written together.
        if self.max_bulk_operations < 2 {
            return Err(BillingError::Configuration(
                "max_bulk_operations must be at least 2".to_string(),
            ));
        }
        if self.max_concurrent_accounts == 0 {
            return Err(BillingError::Configuration(
                "max_concurrent_accounts must be at least 1".to_string(),
            ));
        }
        self.rate_schedule().map(|_| ())
    }

    /// Builds the validated rate schedule
    pub fn rate_schedule(&self) -> Result<RateSchedule, BillingError> {
        RateSchedule::new(self.rate_tiers.clone(), self.minimum_charge, self.currency)
    }

    /// Builds the charge calculator for this tariff
    pub fn charge_calculator(&self) -> Result<ChargeCalculator, BillingError> {
        Ok(ChargeCalculator::new(
            self.rate_schedule()?,
            self.tax_rate,
            self.senior_discount_rate,
            self.penalty_rate,
        ))
    }
}
