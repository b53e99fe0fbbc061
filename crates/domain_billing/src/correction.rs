//! Bill corrections
//!
//! Issued bills are never edited in place. A correction is a credit
//! adjustment: it lowers what the bill still owes, sends anything beyond
//! that to the overpayment pool, and leaves an append-only
//! [`BillAdjustment`] behind. Under-billing is corrected by issuing a new
//! bill.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};

use core_kernel::{AdjustmentId, BillId, Currency, Money};
use crate::adjustment::BillAdjustment;
use crate::bill_engine::AccountBook;
use crate::error::BillingError;
use crate::locks::AccountLocks;
use crate::repository::{BillingRepository, UnitWrite};

/// Applies credit adjustments
pub struct CorrectionEngine {
    repository: BillingRepository,
    locks: Arc<AccountLocks>,
    currency: Currency,
}

impl CorrectionEngine {
    /// Creates an engine
    pub fn new(repository: BillingRepository, locks: Arc<AccountLocks>, currency: Currency) -> Self {
        Self {
            repository,
            locks,
            currency,
        }
    }

    /// Credits `amount` against a bill
    #[instrument(skip(self, reason), fields(bill_id = %bill_id, amount = %amount))]
    pub async fn credit(
        &self,
        bill_id: &BillId,
        amount: Money,
        reason: impl Into<String>,
    ) -> Result<BillAdjustment, BillingError> {
        let reason = reason.into();
        if !amount.is_positive() {
            return Err(BillingError::InvalidAdjustment(format!(
                "credit must be positive, got {}",
                amount.amount()
            )));
        }
        if amount.currency() != self.currency {
            return Err(BillingError::InvalidAdjustment(format!(
                "credit is in {}, bills are in {}",
                amount.currency(),
                self.currency
            )));
        }
        if reason.trim().is_empty() {
            return Err(BillingError::InvalidAdjustment("a reason is required".to_string()));
        }

        let account_id = self.repository.bill(bill_id).await?.account_id;
        let _guard = self.locks.acquire(&account_id).await;

        let mut book = AccountBook::load(&self.repository, account_id, self.currency).await?;
        let ledger_before = book.ledger.clone();
        let bill = book
            .bills
            .iter_mut()
            .find(|b| b.id == *bill_id)
            .ok_or_else(|| BillingError::BillNotFound(bill_id.to_string()))?;

        let bill_before = self.repository.bill_op(bill)?;
        let applied_to_bill = bill.apply_credit(amount)?;
        let credited_to_pool = amount - applied_to_bill;
        let bill_after = self.repository.bill_op(bill)?;

        let latest_remaining = book
            .bills
            .last()
            .map(|b| b.remaining_amount)
            .unwrap_or_else(|| Money::zero(self.currency));
        book.ledger
            .record_credit(applied_to_bill, credited_to_pool, latest_remaining);

        let adjustment = BillAdjustment {
            id: AdjustmentId::new(),
            bill_id: *bill_id,
            account_id,
            amount,
            applied_to_bill,
            credited_to_pool,
            reason,
            created_at: Utc::now(),
        };

        let pre_images = vec![self.repository.ledger_op(&ledger_before)?, bill_before.clone()];
        self.repository
            .write_unit(
                &account_id,
                vec![
                    UnitWrite::replacing(bill_after, bill_before),
                    UnitWrite::replacing(
                        self.repository.ledger_op(&book.ledger)?,
                        self.repository.ledger_op(&ledger_before)?,
                    ),
                ],
            )
            .await?;

        // The adjustment goes last: it cannot be withdrawn once written.
        if let Err(e) = self.repository.put_adjustment(&adjustment).await {
            let unrestored = self.repository.compensate(pre_images).await;
            error!(error = %e, unrestored, "Adjustment not recorded, credit rolled back");
            return Err(BillingError::ledger_write_failed(&account_id, e.to_string()));
        }

        info!(
            account_id = %account_id,
            applied_to_bill = %applied_to_bill,
            credited_to_pool = %credited_to_pool,
            "Credit adjustment recorded"
        );
        Ok(adjustment)
    }

    /// Adjustments recorded against a bill, oldest first
    pub async fn history(&self, bill_id: &BillId) -> Result<Vec<BillAdjustment>, BillingError> {
        self.repository.bill(bill_id).await?;
        self.repository.adjustments_for_bill(bill_id).await
    }
}
