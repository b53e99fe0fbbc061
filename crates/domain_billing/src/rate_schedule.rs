//! Tiered water rates
//!
//! Consumption is charged band by band: every cubic meter is priced at the
//! rate of the band it falls in, and the bands' products are summed. Any
//! nonzero consumption is billed at least the minimum charge.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::{Currency, Money};
use crate::error::BillingError;

/// One consumption band, inclusive on both ends, in cubic meters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTier {
    /// First cubic meter of the band (1-based)
    pub from: u64,
    /// Last cubic meter of the band, `None` for the open-ended top band
    pub to: Option<u64>,
    /// Price per cubic meter
    pub rate: Decimal,
}

impl RateTier {
    /// Creates a bounded tier
    pub fn bounded(from: u64, to: u64, rate: Decimal) -> Self {
        Self { from, to: Some(to), rate }
    }

    /// Creates the open-ended top tier
    pub fn open(from: u64, rate: Decimal) -> Self {
        Self { from, to: None, rate }
    }

    /// Number of units of `consumption` that fall inside this band
    pub fn units_in_band(&self, consumption: u64) -> u64 {
        if consumption < self.from {
            return 0;
        }
        let upper = match self.to {
            Some(to) => consumption.min(to),
            None => consumption,
        };
        upper - self.from + 1
    }
}

/// The tiered tariff plus its minimum-charge floor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSchedule {
    tiers: Vec<RateTier>,
    minimum_charge: Decimal,
    currency: Currency,
}

impl RateSchedule {
    /// Builds a schedule after checking that the tiers form one contiguous
    /// range starting at 1 with only the last tier open-ended.
    pub fn new(
        tiers: Vec<RateTier>,
        minimum_charge: Decimal,
        currency: Currency,
    ) -> Result<Self, BillingError> {
        if tiers.is_empty() {
            return Err(BillingError::InvalidRateSchedule("no tiers".to_string()));
        }
        if minimum_charge < Decimal::ZERO {
            return Err(BillingError::InvalidRateSchedule(format!(
                "negative minimum charge {}",
                minimum_charge
            )));
        }

        let mut expected_from = 1;
        for (i, tier) in tiers.iter().enumerate() {
            if tier.rate < Decimal::ZERO {
                return Err(BillingError::InvalidRateSchedule(format!(
                    "tier starting at {} has negative rate {}",
                    tier.from, tier.rate
                )));
            }
            if tier.from != expected_from {
                return Err(BillingError::InvalidRateSchedule(format!(
                    "tier {} starts at {}, expected {}",
                    i, tier.from, expected_from
                )));
            }
            let is_last = i == tiers.len() - 1;
            match (tier.to, is_last) {
                (Some(to), _) if to < tier.from => {
                    return Err(BillingError::InvalidRateSchedule(format!(
                        "tier {} ends at {} before it starts at {}",
                        i, to, tier.from
                    )));
                }
                (Some(to), false) => expected_from = to + 1,
                (None, false) => {
                    return Err(BillingError::InvalidRateSchedule(format!(
                        "tier {} is open-ended but is not the last tier",
                        i
                    )));
                }
                (Some(_), true) => {
                    return Err(BillingError::InvalidRateSchedule(
                        "last tier must be open-ended".to_string(),
                    ));
                }
                (None, true) => {}
            }
        }

        Ok(Self {
            tiers,
            minimum_charge,
            currency,
        })
    }

    /// The water district's standard residential tariff
    pub fn standard(currency: Currency) -> Self {
        Self {
            tiers: standard_tiers(),
            minimum_charge: dec!(191.00),
            currency,
        }
    }

    /// Returns the minimum charge for nonzero consumption
    pub fn minimum_charge(&self) -> Money {
        Money::new(self.minimum_charge, self.currency)
    }

    /// Returns the schedule currency
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Tiered charge for `consumption` cubic meters
    ///
    /// Zero consumption costs nothing; anything above zero costs at least
    /// the minimum charge.
    pub fn charge(&self, consumption: u64) -> Money {
        if consumption == 0 {
            return Money::zero(self.currency);
        }

        let computed: Decimal = self
            .tiers
            .iter()
            .map(|tier| Decimal::from(tier.units_in_band(consumption)) * tier.rate)
            .sum();

        Money::new(computed.max(self.minimum_charge), self.currency)
    }
}

/// Default bands: 1-10, 11-20, 21-30, 31-40, 41-50, 51+
pub fn standard_tiers() -> Vec<RateTier> {
    vec![
        RateTier::bounded(1, 10, dec!(19.10)),
        RateTier::bounded(11, 20, dec!(21.10)),
        RateTier::bounded(21, 30, dec!(23.10)),
        RateTier::bounded(31, 40, dec!(25.10)),
        RateTier::bounded(41, 50, dec!(27.10)),
        RateTier::open(51, dec!(29.10)),
    ]
}
