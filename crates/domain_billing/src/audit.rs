//! Ledger audit and repair
//!
//! The stored ledger is a cache over the account's bills, adjustments, and
//! committed payment applications. The auditor rebuilds it from those
//! documents and reports where the cache has drifted; repair writes the
//! rebuilt ledger back under the account lock.

use std::sync::Arc;

use tracing::{error, info, instrument};

use core_kernel::{AccountId, Currency, Money};
use crate::error::BillingError;
use crate::ledger::{conservation_residual, LedgerDrift, LedgerState};
use crate::locks::AccountLocks;
use crate::repository::BillingRepository;

/// Result of comparing a stored ledger with its source documents
#[derive(Debug, Clone)]
pub struct AuditReport {
    pub account_id: AccountId,
    /// The ledger as stored, if any
    pub stored: Option<LedgerState>,
    /// The ledger rebuilt from bills, adjustments, and payments
    pub recomputed: LedgerState,
    pub drift: Vec<LedgerDrift>,
    /// Imbalance of the stored pool against the source documents
    pub residual: Money,
}

impl AuditReport {
    /// Returns true if the stored ledger matches its sources
    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty() && self.residual.is_zero()
    }
}

/// Recomputes ledgers from source documents
#[derive(Clone)]
pub struct LedgerAuditor {
    repository: BillingRepository,
    locks: Arc<AccountLocks>,
    currency: Currency,
}

impl LedgerAuditor {
    /// Creates an auditor
    pub fn new(repository: BillingRepository, locks: Arc<AccountLocks>, currency: Currency) -> Self {
        Self {
            repository,
            locks,
            currency,
        }
    }

    /// Compares the stored ledger with one rebuilt from source
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn audit(&self, account_id: &AccountId) -> Result<AuditReport, BillingError> {
        let report = self.inspect(account_id).await?;
        if !report.is_consistent() {
            for drift in &report.drift {
                error!(field = drift.field, stored = %drift.stored, recomputed = %drift.recomputed, "Ledger drift");
            }
        }
        Ok(report)
    }

    /// Rewrites the stored ledger from source if it has drifted
    ///
    /// Returns the audit taken before the repair.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn repair(&self, account_id: &AccountId) -> Result<AuditReport, BillingError> {
        let _guard = self.locks.acquire(account_id).await;
        let report = self.inspect(account_id).await?;
        if !report.is_consistent() {
            self.repository.put_ledger(&report.recomputed).await?;
            info!(fields = report.drift.len(), "Ledger repaired");
        }
        Ok(report)
    }

    async fn inspect(&self, account_id: &AccountId) -> Result<AuditReport, BillingError> {
        let bills = self.repository.bills_for(account_id).await?;
        let adjustments = self.repository.adjustments_for(account_id).await?;
        let total_paid = self
            .repository
            .applications_for(account_id)
            .await?
            .iter()
            .filter(|a| a.is_committed())
            .fold(Money::zero(self.currency), |acc, a| acc + a.amount);

        let recomputed =
            LedgerState::recompute(*account_id, self.currency, &bills, &adjustments, total_paid);
        let stored = self.repository.ledger(account_id).await?;

        let baseline = stored
            .clone()
            .unwrap_or_else(|| LedgerState::open(*account_id, self.currency));
        let drift = baseline.drift_from(&recomputed);
        let residual =
            conservation_residual(&bills, &adjustments, total_paid, baseline.overpool_amount);

        Ok(AuditReport {
            account_id: *account_id,
            stored,
            recomputed,
            drift,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::CustomerAccount;
    use crate::bill_engine::BillEngine;
    use crate::config::BillingConfig;
    use crate::ports::mock::{InMemoryStore, RecordingNotifier};
    use crate::reading::MeterReading;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_detects_and_repairs_drift() {
        let store = Arc::new(InMemoryStore::new());
        let repository = BillingRepository::new(store);
        let locks = Arc::new(AccountLocks::new());
        let engine = BillEngine::new(
            repository.clone(),
            &BillingConfig::default(),
            Arc::new(RecordingNotifier::new()),
            locks.clone(),
        )
        .unwrap();
        let auditor = LedgerAuditor::new(repository.clone(), locks, Currency::PHP);

        let account = CustomerAccount::new("0042", "Lito Ramos");
        repository.save_account(&account).await.unwrap();
        engine
            .issue_bill(&MeterReading {
                account_id: account.id,
                previous_value: 0,
                current_value: 5,
                period_end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                month: 1,
                year: 2024,
            })
            .await
            .unwrap();
        assert!(auditor.audit(&account.id).await.unwrap().is_consistent());

        let mut ledger = repository.ledger(&account.id).await.unwrap().unwrap();
        ledger.current_amount_due = Money::new(dec!(1), Currency::PHP);
        ledger.overpool_amount = Money::new(dec!(50), Currency::PHP);
        repository.put_ledger(&ledger).await.unwrap();

        let report = auditor.audit(&account.id).await.unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.drift.len(), 2);
        assert_eq!(report.residual, Money::new(dec!(50), Currency::PHP));

        auditor.repair(&account.id).await.unwrap();
        assert!(auditor.audit(&account.id).await.unwrap().is_consistent());
    }
}
