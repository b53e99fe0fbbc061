//! Batch billing
//!
//! Bills a whole reading cycle. Readings are grouped by account; each
//! account is billed by one task, in input order, against a single
//! [`AccountBook`]. Up to `max_concurrent_accounts` accounts run at once.
//!
//! Every drafted bill contributes two writes (the bill and its account's
//! ledger) to a shared bulk-write unit. A unit holds at most one bill per
//! account and is committed when the next bill would push it past the
//! store's ceiling or would be a second bill for an account already in it,
//! and once more at the end. A task's account lock travels with its pending
//! bill and is released only when that bill has been committed, so no other
//! writer sees the account half-billed.
//!
//! Once a bill of an account fails to commit, the account is halted: its
//! later drafts in the run are reported failed and never written.
//!
//! A task that finds its account locked commits the shared unit before it
//! waits, and while any task waits each bill is committed as soon as it is
//! queued. A run therefore never waits on a lock while holding guards of
//! its own that only it can release.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use core_kernel::AccountId;
use crate::audit::LedgerAuditor;
use crate::bill_engine::{AccountBook, BillEngine};
use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::events::BillingEvent;
use crate::locks::AccountLocks;
use crate::ports::{deliver, WriteOperation};
use crate::reading::MeterReading;

/// Tally of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Bills issued and committed
    pub succeeded: usize,
    /// Readings that could not be billed because of an error
    pub failed: usize,
    /// Readings deliberately not billed (invalid or already billed)
    pub skipped: usize,
    /// One entry per failed or skipped reading, in input order
    pub errors: Vec<BatchItemError>,
    /// The run was cancelled before every reading was drafted
    pub cancelled: bool,
}

impl BatchReport {
    /// Readings accounted for
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Why one reading was not billed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemError {
    /// Position of the reading in the input
    pub index: usize,
    pub account_id: AccountId,
    /// Short error code, see [`BillingError::code`]
    pub code: &'static str,
    pub message: String,
}

/// Cooperative cancellation for a batch run
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the run to stop drafting
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancelled
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs bill issuance over many readings
pub struct BatchRunner {
    engine: Arc<BillEngine>,
    auditor: LedgerAuditor,
    max_concurrent_accounts: usize,
    max_bulk_operations: usize,
    bulk_write_retries: u32,
}

impl BatchRunner {
    /// Creates a runner; the bulk ceiling is the smaller of the configured
    /// one and the store's
    pub fn new(engine: Arc<BillEngine>, auditor: LedgerAuditor, config: &BillingConfig) -> Self {
        let store_ceiling = engine.repository().max_bulk_operations();
        Self {
            max_concurrent_accounts: config.max_concurrent_accounts.max(1),
            max_bulk_operations: config.max_bulk_operations.min(store_ceiling).max(2),
            bulk_write_retries: config.bulk_write_retries,
            engine,
            auditor,
        }
    }

    /// Bills every reading
    pub async fn run_batch(&self, readings: Vec<MeterReading>) -> BatchReport {
        self.run_batch_with_cancel(readings, CancellationFlag::new()).await
    }

    /// Bills readings until done or cancelled
    ///
    /// Cancellation stops drafting; bills already drafted are still
    /// committed, and everything committed stands.
    #[instrument(skip(self, readings, cancel), fields(readings = readings.len()))]
    pub async fn run_batch_with_cancel(
        &self,
        readings: Vec<MeterReading>,
        cancel: CancellationFlag,
    ) -> BatchReport {
        let tally = Arc::new(Mutex::new(Tally::default()));
        let writer = Arc::new(UnitWriter {
            engine: self.engine.clone(),
            ceiling: self.max_bulk_operations,
            retries: self.bulk_write_retries,
            unit: AsyncMutex::new(BulkUnit::default()),
            waiting: AtomicUsize::new(0),
            tally: tally.clone(),
        });
        let permits = Arc::new(Semaphore::new(self.max_concurrent_accounts));
        let mut tasks = JoinSet::new();

        for (account_id, items) in group_by_account(readings) {
            let engine = self.engine.clone();
            let writer = writer.clone();
            let tally = tally.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                bill_account(engine, writer, tally, account_id, items, cancel).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Account task aborted");
            }
        }
        writer.flush().await;

        let Tally {
            mut report,
            accounts_to_repair,
            ..
        } = std::mem::take(&mut *lock(&tally));

        for account_id in accounts_to_repair {
            match self.auditor.repair(&account_id).await {
                Ok(audit) if !audit.drift.is_empty() => {
                    warn!(account_id = %account_id, drift = audit.drift.len(), "Ledger repaired after failed writes");
                }
                Ok(_) => {}
                Err(e) => error!(account_id = %account_id, error = %e, "Ledger repair failed"),
            }
        }

        report.cancelled = cancel.is_cancelled();
        report.errors.sort_by_key(|e| e.index);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Batch complete"
        );
        report
    }
}

#[derive(Debug, Default)]
struct Tally {
    report: BatchReport,
    accounts_to_repair: HashSet<AccountId>,
    /// Accounts with a bill that failed to commit
    halted: HashSet<AccountId>,
}

impl Tally {
    fn record_error(&mut self, index: usize, account_id: AccountId, error: &BillingError) {
        if error.is_skip() {
            self.report.skipped += 1;
        } else {
            self.report.failed += 1;
        }
        self.report.errors.push(BatchItemError {
            index,
            account_id,
            code: error.code(),
            message: error.to_string(),
        });
    }
}

fn lock(tally: &Mutex<Tally>) -> std::sync::MutexGuard<'_, Tally> {
    tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Groups readings by account, keeping accounts in order of first
/// appearance and readings in input order
fn group_by_account(readings: Vec<MeterReading>) -> Vec<(AccountId, Vec<(usize, MeterReading)>)> {
    let mut groups: Vec<(AccountId, Vec<(usize, MeterReading)>)> = Vec::new();
    let mut positions: HashMap<AccountId, usize> = HashMap::new();
    for (index, reading) in readings.into_iter().enumerate() {
        let position = *positions.entry(reading.account_id).or_insert_with(|| {
            groups.push((reading.account_id, Vec::new()));
            groups.len() - 1
        });
        groups[position].1.push((index, reading));
    }
    groups
}

async fn bill_account(
    engine: Arc<BillEngine>,
    writer: Arc<UnitWriter>,
    tally: Arc<Mutex<Tally>>,
    account_id: AccountId,
    items: Vec<(usize, MeterReading)>,
    cancel: CancellationFlag,
) {
    let repository = engine.repository();
    let account = match repository.account(&account_id).await {
        Ok(account) => account,
        Err(e) => {
            warn!(account_id = %account_id, error = %e, "Account could not be resolved");
            let mut tally = lock(&tally);
            for (index, _) in &items {
                tally.record_error(*index, account_id, &e);
            }
            return;
        }
    };

    let guard = match engine.locks().try_acquire(&account_id) {
        Some(guard) => guard,
        None => writer.wait_for_lock(engine.locks(), &account_id).await,
    };
    let guard = Arc::new(guard);
    let currency = engine.calculator().currency();
    let mut book = match AccountBook::load(repository, account_id, currency).await {
        Ok(book) => book,
        Err(e) => {
            warn!(account_id = %account_id, error = %e, "Account book could not be loaded");
            let mut tally = lock(&tally);
            for (index, _) in &items {
                tally.record_error(*index, account_id, &e);
            }
            return;
        }
    };

    for (index, reading) in items {
        if cancel.is_cancelled() {
            break;
        }
        {
            let mut tally = lock(&tally);
            if tally.halted.contains(&account_id) {
                tally.record_error(index, account_id, &earlier_bill_not_written(&account_id));
                continue;
            }
        }
        let draft = match engine.draft(&mut book, &account, &reading) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(
                    account_id = %account_id,
                    billing_period = %format!("{}-{:02}", reading.year, reading.month),
                    error = %e,
                    "Reading not billed"
                );
                lock(&tally).record_error(index, account_id, &e);
                continue;
            }
        };

        let ops = match (
            repository.bill_op(&draft.bill),
            repository.ledger_op(&draft.ledger),
        ) {
            (Ok(bill), Ok(ledger)) => vec![bill, ledger],
            (Err(e), _) | (_, Err(e)) => {
                // The book already counts this bill; later drafts would
                // build on one that is never written.
                let mut tally = lock(&tally);
                tally.record_error(index, account_id, &e);
                tally.halted.insert(account_id);
                continue;
            }
        };

        writer
            .enqueue(
                PendingBill {
                    index,
                    account_id,
                    ops: 0..0,
                    events: draft.events,
                    _guard: guard.clone(),
                },
                ops,
            )
            .await;
    }
}

fn earlier_bill_not_written(account_id: &AccountId) -> BillingError {
    BillingError::ledger_write_failed(account_id, "an earlier bill for this account was not written")
}

struct PendingBill {
    index: usize,
    account_id: AccountId,
    /// Positions of this bill's writes in the unit
    ops: Range<usize>,
    events: Vec<BillingEvent>,
    _guard: Arc<OwnedMutexGuard<()>>,
}

#[derive(Default)]
struct BulkUnit {
    ops: Vec<WriteOperation>,
    bills: Vec<PendingBill>,
}

struct UnitWriter {
    engine: Arc<BillEngine>,
    ceiling: usize,
    retries: u32,
    unit: AsyncMutex<BulkUnit>,
    /// Tasks of this run blocked on an account lock
    waiting: AtomicUsize,
    tally: Arc<Mutex<Tally>>,
}

impl UnitWriter {
    /// Adds one bill's writes
    ///
    /// The current unit is committed first if the writes would not fit or
    /// the unit already holds a bill for the account. A bill whose account
    /// is halted by then is reported failed instead of queued.
    async fn enqueue(&self, mut bill: PendingBill, ops: Vec<WriteOperation>) {
        let committed = {
            let mut unit = self.unit.lock().await;
            let mut committed = Vec::new();
            let full = unit.ops.len() + ops.len() > self.ceiling;
            let holds_account = unit.bills.iter().any(|b| b.account_id == bill.account_id);
            if !unit.ops.is_empty() && (full || holds_account) {
                committed = self.commit(std::mem::take(&mut *unit)).await;
            }

            let halted = {
                let mut tally = lock(&self.tally);
                let halted = tally.halted.contains(&bill.account_id);
                if halted {
                    tally.record_error(bill.index, bill.account_id, &earlier_bill_not_written(&bill.account_id));
                }
                halted
            };
            if !halted {
                let start = unit.ops.len();
                unit.ops.extend(ops);
                bill.ops = start..unit.ops.len();
                unit.bills.push(bill);
            }

            if self.waiting.load(Ordering::SeqCst) > 0 && !unit.ops.is_empty() {
                committed.extend(self.commit(std::mem::take(&mut *unit)).await);
            }
            committed
        };
        deliver(self.engine.notifier().as_ref(), committed).await;
    }

    /// Commits whatever is pending
    async fn flush(&self) {
        let committed = {
            let mut unit = self.unit.lock().await;
            let pending = std::mem::take(&mut *unit);
            if pending.ops.is_empty() {
                return;
            }
            self.commit(pending).await
        };
        deliver(self.engine.notifier().as_ref(), committed).await;
    }

    /// Waits for an account lock another writer holds
    ///
    /// The unit is committed before waiting so the guards it holds are
    /// released, and stays empty until the wait is over.
    async fn wait_for_lock(&self, locks: &AccountLocks, account_id: &AccountId) -> OwnedMutexGuard<()> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.flush().await;
        let guard = locks.acquire(account_id).await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        guard
    }

    /// Writes a unit, retrying failed operations, and returns the events of
    /// the bills that made it
    async fn commit(&self, unit: BulkUnit) -> Vec<BillingEvent> {
        let repository = self.engine.repository();
        let mut pending: Vec<usize> = (0..unit.ops.len()).collect();
        let mut last_error = String::new();
        let mut attempt = 0;

        loop {
            let ops = pending.iter().map(|&i| unit.ops[i].clone()).collect();
            match repository.bulk_write(ops).await {
                Ok(result) => {
                    pending = pending
                        .iter()
                        .enumerate()
                        .filter(|(position, _)| result.failed(*position))
                        .map(|(_, &i)| i)
                        .collect();
                    if let Some(failure) = result.failures.first() {
                        last_error = failure.reason.clone();
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                    if !e.is_transient() {
                        break;
                    }
                }
            }
            if pending.is_empty() || attempt >= self.retries {
                break;
            }
            attempt += 1;
            warn!(attempt, failed = pending.len(), "Retrying failed bulk-write operations");
        }

        let failed: HashSet<usize> = pending.into_iter().collect();
        let mut events = Vec::new();
        let mut tally = lock(&self.tally);
        for bill in unit.bills {
            if bill.ops.clone().any(|i| failed.contains(&i)) {
                let error = BillingError::ledger_write_failed(&bill.account_id, last_error.clone());
                error!(account_id = %bill.account_id, error = %error, "Bill write failed");
                tally.record_error(bill.index, bill.account_id, &error);
                tally.accounts_to_repair.insert(bill.account_id);
                tally.halted.insert(bill.account_id);
            } else {
                tally.report.succeeded += 1;
                events.extend(bill.events);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(account_id: AccountId, month: u32) -> MeterReading {
        MeterReading {
            account_id,
            previous_value: 0,
            current_value: 10,
            period_end: NaiveDate::from_ymd_opt(2024, month, 28).unwrap(),
            month,
            year: 2024,
        }
    }

    #[test]
    fn test_group_by_account_keeps_order() {
        let a = AccountId::new();
        let b = AccountId::new();
        let groups = group_by_account(vec![reading(a, 1), reading(b, 1), reading(a, 2)]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, a);
        assert_eq!(
            groups[0].1.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![0, 2]
        );
        assert_eq!(groups[1].1[0].0, 1);
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_report_processed() {
        let report = BatchReport {
            succeeded: 49,
            skipped: 1,
            ..Default::default()
        };
        assert_eq!(report.processed(), 50);
    }
}
