//! Proptest strategies for billing inputs
//!
//! Consumption is skewed toward the first tiers, amounts are whole
//! centavos, and generated histories always open with a bill.

use core_kernel::{Currency, Money};
use proptest::prelude::*;

/// Strategy for monthly consumption in cubic meters
pub fn consumption_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        3 => 0u64..=30,
        1 => 31u64..=500,
    ]
}

/// Strategy for PHP amounts up to 10,000.00 in centavos
pub fn php_amount_strategy() -> impl Strategy<Value = Money> {
    (0i64..=1_000_000).prop_map(|centavos| Money::from_minor(centavos, Currency::PHP))
}

/// Strategy for strictly positive PHP amounts
pub fn positive_php_strategy() -> impl Strategy<Value = Money> {
    (1i64..=1_000_000).prop_map(|centavos| Money::from_minor(centavos, Currency::PHP))
}

/// One step in a generated account history
#[derive(Debug, Clone)]
pub enum LedgerStep {
    /// Issue the next monthly bill with this consumption
    Bill(u64),
    /// Apply a verified payment of this amount
    Pay(Money),
    /// Credit the oldest bill with this amount
    Credit(Money),
}

/// Strategy for a single ledger step, weighted toward bills and payments
pub fn ledger_step_strategy() -> impl Strategy<Value = LedgerStep> {
    prop_oneof![
        4 => consumption_strategy().prop_map(LedgerStep::Bill),
        3 => php_amount_strategy().prop_map(LedgerStep::Pay),
        1 => positive_php_strategy().prop_map(LedgerStep::Credit),
    ]
}

/// Strategy for an account history that starts with a bill
pub fn ledger_history_strategy(max_steps: usize) -> impl Strategy<Value = Vec<LedgerStep>> {
    (consumption_strategy(), prop::collection::vec(ledger_step_strategy(), 0..max_steps)).prop_map(
        |(first, rest)| {
            let mut steps = vec![LedgerStep::Bill(first)];
            steps.extend(rest);
            steps
        },
    )
}
