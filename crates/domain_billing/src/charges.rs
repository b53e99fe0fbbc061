//! Bill amount calculation
//!
//! The order of the steps is part of the tariff: tax is levied on the water
//! charge, the senior discount on the taxed subtotal, and the late-payment
//! penalty on the discounted amount. No step rounds its result.

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::{Currency, Money, Rate};
use crate::rate_schedule::RateSchedule;

/// Itemised charges for one bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeBreakdown {
    /// Tiered consumption charge
    pub water_charge: Money,
    /// Tax on the water charge
    pub tax: Money,
    /// Senior citizen discount on the taxed subtotal
    pub senior_discount: Money,
    /// Late-payment penalty on the discounted amount
    pub penalty: Money,
    /// Water charge plus tax, less the senior discount
    pub subtotal_before_penalty: Money,
    /// Subtotal plus penalty
    pub total_due: Money,
}

impl ChargeBreakdown {
    /// Water charge plus tax, before any discount
    pub fn subtotal(&self) -> Money {
        self.water_charge + self.tax
    }
}

/// A breakdown after the account's overpayment pool has been drawn on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditedCharge {
    /// Amount taken from the overpayment pool
    pub overpayment_applied: Money,
    /// What is left of the pre-penalty subtotal
    pub payable_before_penalty: Money,
    /// Penalty recomputed on the reduced base
    pub penalty: Money,
    /// Amount the bill is issued for
    pub total_due: Money,
}

/// Combines the rate schedule with tax, discount, and penalty rules
#[derive(Debug, Clone)]
pub struct ChargeCalculator {
    schedule: RateSchedule,
    tax_rate: Rate,
    senior_discount_rate: Rate,
    penalty_rate: Rate,
}

impl ChargeCalculator {
    /// Creates a calculator with explicit rates
    pub fn new(
        schedule: RateSchedule,
        tax_rate: Rate,
        senior_discount_rate: Rate,
        penalty_rate: Rate,
    ) -> Self {
        Self {
            schedule,
            tax_rate,
            senior_discount_rate,
            penalty_rate,
        }
    }

    /// Standard tariff: 2% tax, 5% senior discount, 10% penalty
    pub fn standard(currency: Currency) -> Self {
        Self::new(
            RateSchedule::standard(currency),
            Rate::new(dec!(0.02)),
            Rate::new(dec!(0.05)),
            Rate::new(dec!(0.10)),
        )
    }

    /// Returns the currency bills are computed in
    pub fn currency(&self) -> Currency {
        self.schedule.currency()
    }

    /// Computes the full breakdown for a consumption
    pub fn compute(&self, consumption: u64, is_senior: bool) -> ChargeBreakdown {
        let water_charge = self.schedule.charge(consumption);
        let tax = self.tax_rate.apply(&water_charge);
        let subtotal = water_charge + tax;
        let senior_discount = if is_senior {
            self.senior_discount_rate.apply(&subtotal)
        } else {
            Money::zero(self.currency())
        };
        let subtotal_before_penalty = subtotal - senior_discount;
        let penalty = self.penalty_rate.apply(&subtotal_before_penalty);
        let total_due = subtotal_before_penalty + penalty;

        ChargeBreakdown {
            water_charge,
            tax,
            senior_discount,
            penalty,
            subtotal_before_penalty,
            total_due,
        }
    }

    /// Draws up to `available_credit` from the overpayment pool against the
    /// pre-penalty subtotal and recomputes the penalty on what remains.
    ///
    /// A bill fully covered by credit carries no penalty.
    pub fn apply_credit(&self, breakdown: &ChargeBreakdown, available_credit: Money) -> CreditedCharge {
        let base = breakdown.subtotal_before_penalty;
        let overpayment_applied = if available_credit.is_positive() {
            available_credit.min(base)
        } else {
            Money::zero(base.currency())
        };
        let payable_before_penalty = base - overpayment_applied;
        let penalty = self.penalty_rate.apply(&payable_before_penalty);

        CreditedCharge {
            overpayment_applied,
            payable_before_penalty,
            penalty,
            total_due: payable_before_penalty + penalty,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn compute_is_deterministic_and_non_negative(consumption in 0u64..10_000, senior in any::<bool>()) {
            let calc = ChargeCalculator::standard(Currency::PHP);
            let first = calc.compute(consumption, senior);
            let second = calc.compute(consumption, senior);

            prop_assert_eq!(first, second);
            prop_assert!(!first.total_due.is_negative());
            prop_assert_eq!(first.total_due, first.subtotal_before_penalty + first.penalty);
        }

        #[test]
        fn credit_never_exceeds_base(consumption in 1u64..500, pool_minor in 0i64..200_000) {
            let calc = ChargeCalculator::standard(Currency::PHP);
            let breakdown = calc.compute(consumption, false);
            let pool = Money::from_minor(pool_minor, Currency::PHP);

            let credited = calc.apply_credit(&breakdown, pool);
            prop_assert!(credited.overpayment_applied <= breakdown.subtotal_before_penalty);
            prop_assert!(credited.overpayment_applied <= pool);
            prop_assert!(!credited.total_due.is_negative());
            prop_assert_eq!(
                credited.overpayment_applied + credited.payable_before_penalty,
                breakdown.subtotal_before_penalty
            );
        }
    }
}
