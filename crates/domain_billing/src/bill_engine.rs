//! Bill issuance
//!
//! Turns a meter reading into a bill for one account and billing period.
//! Drafting is pure: it works on an in-memory [`AccountBook`] and advances
//! it, so the batch runner can draft several periods for an account against
//! a single load. [`BillEngine::issue_bill`] is the one-off path that loads,
//! drafts, and persists under the account lock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};

use core_kernel::{AccountId, BillId, Currency, Money};
use crate::account::CustomerAccount;
use crate::bill::{bill_number, status_for, Bill};
use crate::charges::ChargeCalculator;
use crate::config::BillingConfig;
use crate::error::BillingError;
use crate::events::BillingEvent;
use crate::ledger::LedgerState;
use crate::locks::AccountLocks;
use crate::ports::{deliver, NotificationPort};
use crate::reading::{BillingPeriod, MeterReading};
use crate::repository::{BillingRepository, UnitWrite};

/// An account's bills and ledger as loaded for drafting
#[derive(Debug, Clone)]
pub struct AccountBook {
    pub account_id: AccountId,
    pub ledger: LedgerState,
    /// Oldest first
    pub bills: Vec<Bill>,
}

impl AccountBook {
    /// A book with no bills
    pub fn empty(account_id: AccountId, currency: Currency) -> Self {
        Self {
            account_id,
            ledger: LedgerState::open(account_id, currency),
            bills: Vec::new(),
        }
    }

    /// Loads an account's bills and ledger
    ///
    /// The ledger is rebuilt from bills, adjustments and committed payment
    /// records when it is missing or its bill count disagrees with the
    /// highest stored sequence. The second case is a unit whose bill landed
    /// without its ledger, or the reverse.
    pub async fn load(
        repository: &BillingRepository,
        account_id: AccountId,
        currency: Currency,
    ) -> Result<Self, BillingError> {
        let bills = repository.bills_for(&account_id).await?;
        let highest = bills.iter().map(|b| b.sequence_number).max().unwrap_or(0);
        let ledger = match repository.ledger(&account_id).await? {
            Some(ledger) if ledger.bill_count == highest => ledger,
            None if bills.is_empty() => LedgerState::open(account_id, currency),
            stored => {
                if let Some(stored) = &stored {
                    warn!(
                        account_id = %account_id,
                        ledger_bill_count = stored.bill_count,
                        highest_sequence = highest,
                        "Ledger out of step with stored bills, rebuilding"
                    );
                }
                let adjustments = repository.adjustments_for(&account_id).await?;
                let total_paid = repository
                    .applications_for(&account_id)
                    .await?
                    .iter()
                    .filter(|a| a.is_committed())
                    .fold(Money::zero(currency), |acc, a| acc + a.amount);
                LedgerState::recompute(account_id, currency, &bills, &adjustments, total_paid)
            }
        };
        Ok(Self {
            account_id,
            ledger,
            bills,
        })
    }

    /// Returns true if a bill exists for the period
    pub fn has_period(&self, period: BillingPeriod) -> bool {
        self.bills.iter().any(|b| b.billing_period == period)
    }

    /// Number of bills with something still owed
    pub fn unpaid_bills(&self) -> usize {
        self.bills.iter().filter(|b| b.is_outstanding()).count()
    }

    /// Sum of what every bill still owes
    pub fn outstanding(&self) -> Money {
        self.bills
            .iter()
            .fold(Money::zero(self.ledger.current_amount_due.currency()), |acc, b| {
                acc + b.remaining_amount
            })
    }

    /// Sequence number the next bill gets
    ///
    /// Ledgers kept by older writers may lag their bills, so the highest
    /// sequence already issued is the floor.
    pub fn next_sequence(&self) -> u64 {
        let highest = self.bills.iter().map(|b| b.sequence_number).max().unwrap_or(0);
        self.ledger.bill_count.max(highest).max(self.bills.len() as u64) + 1
    }
}

/// A drafted bill with the ledger it produces and the events to emit once
/// both are written
#[derive(Debug, Clone)]
pub struct BillDraft {
    pub bill: Bill,
    pub ledger: LedgerState,
    pub events: Vec<BillingEvent>,
}

/// Issues bills
pub struct BillEngine {
    repository: BillingRepository,
    calculator: ChargeCalculator,
    notifier: Arc<dyn NotificationPort>,
    locks: Arc<AccountLocks>,
    due_days: u32,
    disconnection_threshold: usize,
}

impl BillEngine {
    /// Creates an engine from configuration
    pub fn new(
        repository: BillingRepository,
        config: &BillingConfig,
        notifier: Arc<dyn NotificationPort>,
        locks: Arc<AccountLocks>,
    ) -> Result<Self, BillingError> {
        config.validate()?;
        Ok(Self {
            repository,
            calculator: config.charge_calculator()?,
            notifier,
            locks,
            due_days: config.due_days,
            disconnection_threshold: config.disconnection_threshold,
        })
    }

    /// Returns the repository
    pub fn repository(&self) -> &BillingRepository {
        &self.repository
    }

    /// Returns the charge calculator
    pub fn calculator(&self) -> &ChargeCalculator {
        &self.calculator
    }

    /// Returns the notifier
    pub fn notifier(&self) -> &Arc<dyn NotificationPort> {
        &self.notifier
    }

    /// Returns the account locks
    pub fn locks(&self) -> &Arc<AccountLocks> {
        &self.locks
    }

    /// Drafts the bill for `reading` and advances `book` past it
    ///
    /// On error the book is left untouched.
    pub fn draft(
        &self,
        book: &mut AccountBook,
        account: &CustomerAccount,
        reading: &MeterReading,
    ) -> Result<BillDraft, BillingError> {
        if reading.account_id != account.id || book.account_id != account.id {
            return Err(BillingError::invalid_reading(
                &reading.account_id,
                format!("reading does not belong to account {}", account.id),
            ));
        }
        let (period, consumption) = reading.validate()?;
        if book.has_period(period) {
            return Err(BillingError::DuplicateBillingPeriod {
                account_id: account.id.to_string(),
                billing_period: period.to_string(),
            });
        }
        if let Some(last) = book.ledger.last_reading {
            if last.value != reading.previous_value {
                warn!(
                    account_id = %account.id,
                    billing_period = %period,
                    last_reading = last.value,
                    previous_value = reading.previous_value,
                    "Previous value does not match the last billed reading"
                );
            }
        }

        let breakdown = self.calculator.compute(consumption, account.is_senior);
        let credited = self
            .calculator
            .apply_credit(&breakdown, book.ledger.overpool_amount);
        let sequence_number = book.next_sequence();
        let now = Utc::now();

        let bill = Bill {
            id: BillId::new(),
            account_id: account.id,
            sequence_number,
            bill_number: bill_number(sequence_number),
            billing_period: period,
            due_date: reading.period_end + Duration::days(i64::from(self.due_days)),
            previous_reading: reading.previous_value,
            current_reading: reading.current_value,
            consumption,
            charge: breakdown,
            arrears_at_issue: book.outstanding(),
            overpayment_applied: credited.overpayment_applied,
            payable_before_penalty: credited.payable_before_penalty,
            penalty_due: credited.penalty,
            remaining_amount: credited.total_due,
            original_amount: credited.total_due,
            adjustments_total: Money::zero(credited.total_due.currency()),
            status: status_for(credited.total_due, credited.total_due),
            issued_at: now,
            updated_at: now,
        };

        let mut ledger = book.ledger.clone();
        ledger.record_bill(&bill)?;

        book.bills.push(bill.clone());
        book.ledger = ledger.clone();

        let mut events = vec![BillingEvent::BillCreated {
            account_id: account.id,
            billing_period: period,
            due_date: bill.due_date,
            overpayment_applied: bill.overpayment_applied,
            timestamp: now,
        }];
        let unpaid_bills = book.unpaid_bills();
        if unpaid_bills >= self.disconnection_threshold {
            events.push(BillingEvent::DisconnectionRisk {
                account_id: account.id,
                unpaid_bills,
                timestamp: now,
            });
        }

        Ok(BillDraft {
            bill,
            ledger,
            events,
        })
    }

    /// Issues a single bill
    #[instrument(skip(self, reading), fields(account_id = %reading.account_id))]
    pub async fn issue_bill(&self, reading: &MeterReading) -> Result<Bill, BillingError> {
        let period = reading.billing_period()?;
        reading.consumption()?;

        let account = self.repository.account(&reading.account_id).await?;
        let _guard = self.locks.acquire(&account.id).await;

        if self
            .repository
            .bill_for_period(&account.id, period)
            .await?
            .is_some()
        {
            return Err(BillingError::DuplicateBillingPeriod {
                account_id: account.id.to_string(),
                billing_period: period.to_string(),
            });
        }

        let currency = self.calculator.currency();
        let mut book = AccountBook::load(&self.repository, account.id, currency).await?;
        let ledger_before = book.ledger.clone();
        let draft = self.draft(&mut book, &account, reading)?;

        // A rolled-back first bill leaves an opened, empty ledger behind.
        let ledger_write = UnitWrite::replacing(
            self.repository.ledger_op(&draft.ledger)?,
            self.repository.ledger_op(&ledger_before)?,
        );
        self.repository
            .write_unit(
                &account.id,
                vec![UnitWrite::creating(self.repository.bill_op(&draft.bill)?), ledger_write],
            )
            .await?;

        info!(
            billing_period = %period,
            bill_number = %draft.bill.bill_number,
            amount = %draft.bill.original_amount,
            "Bill issued"
        );

        deliver(self.notifier.as_ref(), draft.events).await;
        Ok(draft.bill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::{InMemoryStore, RecordingNotifier};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn php(amount: rust_decimal::Decimal) -> Money {
        Money::new(amount, Currency::PHP)
    }

    fn engine() -> (BillEngine, Arc<RecordingNotifier>) {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = BillEngine::new(
            BillingRepository::new(store),
            &BillingConfig::default(),
            notifier.clone(),
            Arc::new(AccountLocks::new()),
        )
        .unwrap();
        (engine, notifier)
    }

    fn reading(account: &CustomerAccount, month: u32, previous: u64, current: u64) -> MeterReading {
        MeterReading {
            account_id: account.id,
            previous_value: previous,
            current_value: current,
            period_end: NaiveDate::from_ymd_opt(2024, month, 28).unwrap(),
            month,
            year: 2024,
        }
    }

    #[test]
    fn test_draft_first_bill() {
        let (engine, _) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        let mut book = AccountBook::empty(account.id, Currency::PHP);

        let draft = engine.draft(&mut book, &account, &reading(&account, 1, 0, 5)).unwrap();

        assert_eq!(draft.bill.sequence_number, 1);
        assert_eq!(draft.bill.bill_number, "000001");
        assert_eq!(draft.bill.original_amount, php(dec!(214.302)));
        assert_eq!(draft.bill.remaining_amount, draft.bill.original_amount);
        assert!(draft.bill.arrears_at_issue.is_zero());
        assert_eq!(draft.ledger.bill_count, 1);
        assert_eq!(draft.ledger.current_amount_due, php(dec!(214.302)));
        assert_eq!(book.bills.len(), 1);
        assert_eq!(draft.events.len(), 1);
    }

    #[test]
    fn test_draft_absorbs_overpayment_pool() {
        let (engine, _) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        let mut book = AccountBook::empty(account.id, Currency::PHP);
        book.ledger.overpool_amount = php(dec!(300));

        // 5 m³ has a pre-penalty base of 194.82
        let draft = engine.draft(&mut book, &account, &reading(&account, 1, 0, 5)).unwrap();

        assert_eq!(draft.bill.overpayment_applied, php(dec!(194.82)));
        assert!(draft.bill.payable_before_penalty.is_zero());
        assert!(draft.bill.penalty_due.is_zero());
        assert!(draft.bill.original_amount.is_zero());
        assert_eq!(draft.bill.status, crate::bill::BillStatus::Paid);
        assert_eq!(draft.ledger.overpool_amount, php(dec!(105.18)));
    }

    #[test]
    fn test_draft_snapshots_arrears_without_adding_them() {
        let (engine, _) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        let mut book = AccountBook::empty(account.id, Currency::PHP);

        engine.draft(&mut book, &account, &reading(&account, 1, 0, 5)).unwrap();
        let second = engine.draft(&mut book, &account, &reading(&account, 2, 5, 10)).unwrap();

        assert_eq!(second.bill.sequence_number, 2);
        assert_eq!(second.bill.arrears_at_issue, php(dec!(214.302)));
        assert_eq!(second.bill.original_amount, php(dec!(214.302)));
        assert_eq!(second.ledger.arrears, php(dec!(214.302)));
        assert_eq!(second.ledger.current_amount_due, php(dec!(428.604)));
    }

    #[test]
    fn test_draft_rejects_duplicate_period_and_keeps_book() {
        let (engine, _) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        let mut book = AccountBook::empty(account.id, Currency::PHP);
        engine.draft(&mut book, &account, &reading(&account, 1, 0, 5)).unwrap();

        let err = engine
            .draft(&mut book, &account, &reading(&account, 1, 5, 9))
            .unwrap_err();
        assert!(matches!(err, BillingError::DuplicateBillingPeriod { .. }));
        assert_eq!(book.bills.len(), 1);
    }

    #[test]
    fn test_draft_rejects_backwards_meter() {
        let (engine, _) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        let mut book = AccountBook::empty(account.id, Currency::PHP);

        let err = engine
            .draft(&mut book, &account, &reading(&account, 1, 9, 5))
            .unwrap_err();
        assert!(err.is_skip());
        assert!(book.bills.is_empty());
    }

    #[test]
    fn test_third_unpaid_bill_signals_disconnection_risk() {
        let (engine, _) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        let mut book = AccountBook::empty(account.id, Currency::PHP);

        engine.draft(&mut book, &account, &reading(&account, 1, 0, 5)).unwrap();
        let second = engine.draft(&mut book, &account, &reading(&account, 2, 5, 10)).unwrap();
        let third = engine.draft(&mut book, &account, &reading(&account, 3, 10, 15)).unwrap();

        assert!(second.events.iter().all(|e| e.event_type() != "DisconnectionRisk"));
        assert!(matches!(
            third.events.last(),
            Some(BillingEvent::DisconnectionRisk { unpaid_bills: 3, .. })
        ));
    }

    #[test]
    fn test_next_sequence_falls_back_to_prior_bills() {
        let (engine, _) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        let mut book = AccountBook::empty(account.id, Currency::PHP);
        engine.draft(&mut book, &account, &reading(&account, 1, 0, 5)).unwrap();
        engine.draft(&mut book, &account, &reading(&account, 2, 5, 10)).unwrap();

        book.ledger.bill_count = 0;
        assert_eq!(book.next_sequence(), 3);
    }

    #[tokio::test]
    async fn test_issue_bill_persists_and_notifies() {
        let (engine, notifier) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz").senior();
        engine.repository().save_account(&account).await.unwrap();

        let bill = engine.issue_bill(&reading(&account, 3, 100, 125)).await.unwrap();
        assert_eq!(bill.original_amount, php(dec!(566.52585)));

        let ledger = engine.repository().ledger(&account.id).await.unwrap().unwrap();
        assert_eq!(ledger.current_amount_due, php(dec!(566.52585)));
        assert_eq!(ledger.last_reading.unwrap().value, 125);
        assert_eq!(notifier.events_of_type("BillCreated").await.len(), 1);
    }

    #[tokio::test]
    async fn test_issue_bill_twice_for_same_period() {
        let (engine, _) = engine();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        engine.repository().save_account(&account).await.unwrap();

        engine.issue_bill(&reading(&account, 3, 0, 5)).await.unwrap();
        let err = engine.issue_bill(&reading(&account, 3, 0, 5)).await.unwrap_err();
        assert!(matches!(err, BillingError::DuplicateBillingPeriod { .. }));
        assert_eq!(engine.repository().bills_for(&account.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_fail_bill() {
        let (engine, notifier) = engine();
        notifier.set_failing(true);
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        engine.repository().save_account(&account).await.unwrap();

        assert!(engine.issue_bill(&reading(&account, 3, 0, 5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_ledger_write_failure_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        let engine = BillEngine::new(
            BillingRepository::new(store.clone()),
            &BillingConfig::default(),
            Arc::new(RecordingNotifier::new()),
            Arc::new(AccountLocks::new()),
        )
        .unwrap();
        let account = CustomerAccount::new("0001", "Juan Dela Cruz");
        engine.repository().save_account(&account).await.unwrap();
        store.fail_document_ids([account.id.to_string()]).await;

        let err = engine.issue_bill(&reading(&account, 3, 0, 5)).await.unwrap_err();

        assert!(matches!(err, BillingError::LedgerWriteFailed { .. }));
        assert!(engine.repository().ledger(&account.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (engine, _) = engine();
        let stranger = CustomerAccount::new("9999", "Nobody");
        let err = engine.issue_bill(&reading(&stranger, 3, 0, 5)).await.unwrap_err();
        assert!(matches!(err, BillingError::UnknownAccount(_)));
    }
}
