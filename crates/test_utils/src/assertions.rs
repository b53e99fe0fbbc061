//! Assertions over billing documents
//!
//! Each helper panics with the bill number, account, or residual involved,
//! which a bare `assert_eq!` on `Money` would not show.

use core_kernel::{AccountId, Money};
use domain_billing::ledger::conservation_residual;
use domain_billing::{Bill, BillAdjustment, BillStatus, BillingRepository, LedgerAuditor, LedgerState};

pub fn assert_money_zero(money: &Money) {
    assert!(money.is_zero(), "expected zero, got {} {}", money.currency(), money.amount());
}

/// Asserts a bill's remaining amount and status together
pub fn assert_bill_state(bill: &Bill, remaining: &Money, status: BillStatus) {
    assert_eq!(
        (bill.remaining_amount, bill.status),
        (*remaining, status),
        "Bill {} (sequence {}) has remaining {} / {:?}, expected {} / {:?}",
        bill.bill_number,
        bill.sequence_number,
        bill.remaining_amount.amount(),
        bill.status,
        remaining.amount(),
        status
    );
}

/// Asserts the conservation law over an account's documents
///
/// `Σ(original + overpayment applied) − paid − credits = Σ remaining − pool`
pub fn assert_conservation(
    bills: &[Bill],
    adjustments: &[BillAdjustment],
    total_paid: Money,
    ledger: &LedgerState,
) {
    let residual = conservation_residual(bills, adjustments, total_paid, ledger.overpool_amount);
    assert!(
        residual.is_zero(),
        "Conservation violated for account {}: residual {} (pool {}, paid {}, {} bills, {} adjustments)",
        ledger.account_id,
        residual.amount(),
        ledger.overpool_amount.amount(),
        total_paid.amount(),
        bills.len(),
        adjustments.len()
    );
}

/// Asserts the conservation law against the documents in a repository
pub async fn assert_account_conserved(repository: &BillingRepository, account_id: &AccountId) {
    let bills = repository.bills_for(account_id).await.expect("bills readable");
    let adjustments = repository.adjustments_for(account_id).await.expect("adjustments readable");
    let ledger = repository
        .ledger(account_id)
        .await
        .expect("ledger readable")
        .expect("ledger exists");
    let total_paid = repository
        .applications_for(account_id)
        .await
        .expect("applications readable")
        .iter()
        .filter(|a| a.is_committed())
        .fold(Money::zero(ledger.overpool_amount.currency()), |acc, a| acc + a.amount);
    assert_conservation(&bills, &adjustments, total_paid, &ledger);
}

/// Asserts that the stored ledger matches one rebuilt from source
pub async fn assert_ledger_consistent(auditor: &LedgerAuditor, account_id: &AccountId) {
    let report = auditor.audit(account_id).await.expect("audit runs");
    assert!(
        report.is_consistent(),
        "Ledger for {} drifted: {}; residual {}",
        account_id,
        report
            .drift
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        report.residual.amount()
    );
}
