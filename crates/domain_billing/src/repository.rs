//! Typed access to the billing collections
//!
//! The [`BillingRepository`] maps domain types to store documents and back.
//! It decides document ids and collection names; the engines never build a
//! [`Filter`] or touch raw JSON themselves.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use core_kernel::{AccountId, BillId, PortError};
use crate::account::CustomerAccount;
use crate::adjustment::BillAdjustment;
use crate::bill::Bill;
use crate::error::BillingError;
use crate::ledger::LedgerState;
use crate::payment::PaymentApplication;
use crate::ports::{BulkWriteResult, Document, DocumentStore, Filter, WriteOperation};
use crate::reading::BillingPeriod;

/// Collection names
pub mod collections {
    pub const ACCOUNTS: &str = "accounts";
    pub const BILLS: &str = "bills";
    pub const LEDGERS: &str = "ledgers";
    pub const PAYMENT_APPLICATIONS: &str = "payment_applications";
    pub const BILL_ADJUSTMENTS: &str = "bill_adjustments";
}

use collections::*;

/// Repository for accounts, bills, ledgers, payment applications, and
/// adjustments
#[derive(Clone)]
pub struct BillingRepository {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for BillingRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingRepository").finish_non_exhaustive()
    }
}

impl BillingRepository {
    /// Creates a repository over a store
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// The store's bulk-write ceiling
    pub fn max_bulk_operations(&self) -> usize {
        self.store.max_bulk_operations()
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Resolves an account, or `UnknownAccount`
    #[instrument(skip(self), fields(account_id = %id))]
    pub async fn account(&self, id: &AccountId) -> Result<CustomerAccount, BillingError> {
        match self.store.get(ACCOUNTS, &id.to_string()).await {
            Ok(doc) => decode(doc),
            Err(e) if e.is_not_found() => Err(BillingError::UnknownAccount(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores an account
    pub async fn save_account(&self, account: &CustomerAccount) -> Result<(), BillingError> {
        self.store
            .put(ACCOUNTS, &account.id.to_string(), encode(account)?)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bills
    // ------------------------------------------------------------------

    /// Loads a bill, or `BillNotFound`
    #[instrument(skip(self), fields(bill_id = %id))]
    pub async fn bill(&self, id: &BillId) -> Result<Bill, BillingError> {
        match self.store.get(BILLS, &id.to_string()).await {
            Ok(doc) => decode(doc),
            Err(e) if e.is_not_found() => Err(BillingError::BillNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// All bills of an account, oldest first
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn bills_for(&self, account_id: &AccountId) -> Result<Vec<Bill>, BillingError> {
        let docs = self.store.query(BILLS, &by_account(account_id)).await?;
        let mut bills = docs.into_iter().map(decode).collect::<Result<Vec<Bill>, _>>()?;
        bills.sort_by_key(|b| b.sequence_number);
        debug!(count = bills.len(), "Loaded bills");
        Ok(bills)
    }

    /// The account's bill for a period, if one was issued
    pub async fn bill_for_period(
        &self,
        account_id: &AccountId,
        period: BillingPeriod,
    ) -> Result<Option<Bill>, BillingError> {
        let filter = by_account(account_id)
            .eq("billing_period.year", period.year)
            .eq("billing_period.month", period.month);
        let docs = self.store.query(BILLS, &filter).await?;
        docs.into_iter().next().map(decode).transpose()
    }

    /// Stores a bill
    pub async fn put_bill(&self, bill: &Bill) -> Result<(), BillingError> {
        self.store.put(BILLS, &bill.id.to_string(), encode(bill)?).await?;
        Ok(())
    }

    /// Bulk-write upsert for a bill
    pub fn bill_op(&self, bill: &Bill) -> Result<WriteOperation, BillingError> {
        Ok(WriteOperation::put(BILLS, bill.id.to_string(), encode(bill)?))
    }

    // ------------------------------------------------------------------
    // Ledgers
    // ------------------------------------------------------------------

    /// The account's stored ledger, if one exists yet
    pub async fn ledger(&self, account_id: &AccountId) -> Result<Option<LedgerState>, BillingError> {
        match self.store.get(LEDGERS, &account_id.to_string()).await {
            Ok(doc) => decode(doc).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores a ledger
    pub async fn put_ledger(&self, ledger: &LedgerState) -> Result<(), BillingError> {
        self.store
            .put(LEDGERS, &ledger.account_id.to_string(), encode(ledger)?)
            .await?;
        Ok(())
    }

    /// Bulk-write upsert for a ledger
    pub fn ledger_op(&self, ledger: &LedgerState) -> Result<WriteOperation, BillingError> {
        Ok(WriteOperation::put(LEDGERS, ledger.account_id.to_string(), encode(ledger)?))
    }

    // ------------------------------------------------------------------
    // Payment applications
    // ------------------------------------------------------------------

    /// The application record for a payment reference, if any
    pub async fn payment_application(
        &self,
        reference_number: &str,
    ) -> Result<Option<PaymentApplication>, BillingError> {
        match self.store.get(PAYMENT_APPLICATIONS, reference_number).await {
            Ok(doc) => decode(doc).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All application records of an account
    pub async fn applications_for(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<PaymentApplication>, BillingError> {
        let docs = self
            .store
            .query(PAYMENT_APPLICATIONS, &by_account(account_id))
            .await?;
        docs.into_iter().map(decode).collect()
    }

    /// Stores an application record
    pub async fn put_application(&self, application: &PaymentApplication) -> Result<(), BillingError> {
        self.store
            .put(
                PAYMENT_APPLICATIONS,
                &application.reference_number,
                encode(application)?,
            )
            .await?;
        Ok(())
    }

    /// Bulk-write upsert for an application record
    pub fn application_op(&self, application: &PaymentApplication) -> Result<WriteOperation, BillingError> {
        Ok(WriteOperation::put(
            PAYMENT_APPLICATIONS,
            application.reference_number.clone(),
            encode(application)?,
        ))
    }

    // ------------------------------------------------------------------
    // Adjustments
    // ------------------------------------------------------------------

    /// Adjustments recorded against a bill, oldest first
    pub async fn adjustments_for_bill(&self, bill_id: &BillId) -> Result<Vec<BillAdjustment>, BillingError> {
        let filter = Filter::all().eq("bill_id", bill_id.as_uuid().to_string());
        let docs = self.store.query(BILL_ADJUSTMENTS, &filter).await?;
        sorted_adjustments(docs)
    }

    /// Adjustments recorded against any bill of an account
    pub async fn adjustments_for(&self, account_id: &AccountId) -> Result<Vec<BillAdjustment>, BillingError> {
        let docs = self.store.query(BILL_ADJUSTMENTS, &by_account(account_id)).await?;
        sorted_adjustments(docs)
    }

    /// Records an adjustment
    pub async fn put_adjustment(&self, adjustment: &BillAdjustment) -> Result<(), BillingError> {
        let op = self.adjustment_op(adjustment)?;
        self.store.put(&op.collection, &op.id, op.document).await?;
        Ok(())
    }

    /// Bulk-write upsert for an adjustment
    pub fn adjustment_op(&self, adjustment: &BillAdjustment) -> Result<WriteOperation, BillingError> {
        Ok(WriteOperation::put(
            BILL_ADJUSTMENTS,
            adjustment.id.to_string(),
            encode(adjustment)?,
        ))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Submits a bulk write
    pub async fn bulk_write(&self, operations: Vec<WriteOperation>) -> Result<BulkWriteResult, BillingError> {
        Ok(self.store.bulk_write(operations).await?)
    }

    /// Writes a group of documents that must stand or fall together
    ///
    /// The writes go out through bulk writes of at most the store's ceiling.
    /// If any operation fails, every write that did land is compensated with
    /// its pre-image and the unit fails with `LedgerWriteFailed`.
    #[instrument(skip(self, writes), fields(account_id = %account_id, operations = writes.len()))]
    pub async fn write_unit(
        &self,
        account_id: &AccountId,
        writes: Vec<UnitWrite>,
    ) -> Result<(), BillingError> {
        let ceiling = self.max_bulk_operations().max(1);
        let mut landed = Vec::new();
        let mut failure = None;

        for start in (0..writes.len()).step_by(ceiling) {
            let end = (start + ceiling).min(writes.len());
            let ops = writes[start..end].iter().map(|w| w.operation.clone()).collect();
            match self.store.bulk_write(ops).await {
                Ok(result) => {
                    landed.extend((start..end).filter(|i| !result.failed(i - start)));
                    if !result.is_complete() {
                        failure = Some(format!(
                            "{} of {} operations failed",
                            result.failures.len(),
                            end - start
                        ));
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        let Some(reason) = failure else {
            return Ok(());
        };

        let pre_images = landed
            .into_iter()
            .rev()
            .filter_map(|i| writes[i].pre_image.clone())
            .collect();
        let unrestored = self.compensate(pre_images).await;
        if unrestored > 0 {
            error!(unrestored, "Rollback incomplete, ledger needs repair");
            return Err(BillingError::ledger_write_failed(
                account_id,
                format!("{}; {} documents could not be restored", reason, unrestored),
            ));
        }
        warn!(reason = %reason, "Unit rolled back");
        Err(BillingError::ledger_write_failed(account_id, reason))
    }

    /// Puts each pre-image back, returning how many could not be restored
    pub async fn compensate(&self, pre_images: Vec<WriteOperation>) -> usize {
        let mut unrestored = 0;
        for image in pre_images {
            if let Err(e) = self.store.put(&image.collection, &image.id, image.document).await {
                error!(collection = %image.collection, id = %image.id, error = %e, "Failed to restore document");
                unrestored += 1;
            }
        }
        unrestored
    }
}

/// One write of an all-or-nothing unit
#[derive(Debug, Clone)]
pub struct UnitWrite {
    pub operation: WriteOperation,
    /// What to put back if the unit fails after this write landed
    pub pre_image: Option<WriteOperation>,
}

impl UnitWrite {
    /// A write with a compensating pre-image
    pub fn replacing(operation: WriteOperation, pre_image: WriteOperation) -> Self {
        Self {
            operation,
            pre_image: Some(pre_image),
        }
    }

    /// A write of a document that did not exist before
    pub fn creating(operation: WriteOperation) -> Self {
        Self {
            operation,
            pre_image: None,
        }
    }
}

fn by_account(account_id: &AccountId) -> Filter {
    Filter::all().eq("account_id", account_id.as_uuid().to_string())
}

fn sorted_adjustments(docs: Vec<Document>) -> Result<Vec<BillAdjustment>, BillingError> {
    let mut adjustments = docs.into_iter().map(decode).collect::<Result<Vec<BillAdjustment>, _>>()?;
    adjustments.sort_by_key(|a| a.created_at);
    Ok(adjustments)
}

fn encode<T: Serialize>(value: &T) -> Result<Value, BillingError> {
    serde_json::to_value(value).map_err(|e| PortError::from(e).into())
}

fn decode<T: DeserializeOwned>(document: Document) -> Result<T, BillingError> {
    serde_json::from_value(document).map_err(|e| PortError::from(e).into())
}
