//! Payment application
//!
//! A verified payment settles an account's bills oldest first. Whatever is
//! left once every bill is settled goes to the overpayment pool. The touched
//! bills, the ledger, and the payment's application record are written as
//! one unit, and the application record keyed by reference number makes a
//! second delivery of the same payment a no-op.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use core_kernel::{Currency, Money};
use crate::bill_engine::AccountBook;
use crate::error::BillingError;
use crate::events::BillingEvent;
use crate::locks::AccountLocks;
use crate::payment::{ApplicationState, Payment, PaymentAllocation, PaymentApplication, PaymentStatus};
use crate::ports::{deliver, NotificationPort};
use crate::repository::{BillingRepository, UnitWrite};

/// What happened to a payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The payment was applied now
    Applied(PaymentApplication),
    /// The reference number had already been applied; nothing changed
    AlreadyApplied(PaymentApplication),
    /// The payment was rejected at verification; nothing changed
    Rejected,
}

/// Applies payments to bills
pub struct PaymentEngine {
    repository: BillingRepository,
    notifier: Arc<dyn NotificationPort>,
    locks: Arc<AccountLocks>,
    currency: Currency,
}

impl PaymentEngine {
    /// Creates an engine
    pub fn new(
        repository: BillingRepository,
        notifier: Arc<dyn NotificationPort>,
        locks: Arc<AccountLocks>,
        currency: Currency,
    ) -> Self {
        Self {
            repository,
            notifier,
            locks,
            currency,
        }
    }

    /// Processes one payment according to its verification status
    #[instrument(
        skip(self, payment),
        fields(account_id = %payment.account_id, reference = %payment.reference_number)
    )]
    pub async fn process(&self, payment: &Payment) -> Result<PaymentOutcome, BillingError> {
        match payment.status {
            PaymentStatus::Pending => Err(BillingError::PaymentNotVerified(
                payment.reference_number.clone(),
            )),
            PaymentStatus::Rejected => {
                info!("Payment rejected at verification");
                let event = BillingEvent::PaymentRejected {
                    account_id: payment.account_id,
                    timestamp: Utc::now(),
                };
                deliver(self.notifier.as_ref(), vec![event]).await;
                Ok(PaymentOutcome::Rejected)
            }
            PaymentStatus::Verified => self.apply(payment).await,
        }
    }

    async fn apply(&self, payment: &Payment) -> Result<PaymentOutcome, BillingError> {
        if payment.amount.is_negative() {
            return Err(BillingError::InvalidPayment(format!(
                "payment {} has negative amount {}",
                payment.reference_number,
                payment.amount.amount()
            )));
        }
        if payment.amount.currency() != self.currency {
            return Err(BillingError::InvalidPayment(format!(
                "payment {} is in {}, bills are in {}",
                payment.reference_number,
                payment.amount.currency(),
                self.currency
            )));
        }

        let account = self.repository.account(&payment.account_id).await?;
        let _guard = self.locks.acquire(&account.id).await;

        if let Some(existing) = self
            .repository
            .payment_application(&payment.reference_number)
            .await?
        {
            if existing.account_id != account.id {
                return Err(BillingError::InvalidPayment(format!(
                    "reference {} belongs to account {}",
                    payment.reference_number, existing.account_id
                )));
            }
            if existing.is_committed() {
                info!("Payment already applied");
                return Ok(PaymentOutcome::AlreadyApplied(existing));
            }
        }

        let mut book = AccountBook::load(&self.repository, account.id, self.currency).await?;
        let ledger_before = book.ledger.clone();

        let mut writes = Vec::new();
        let mut allocations = Vec::new();
        let mut remaining = payment.amount;

        for bill in book.bills.iter_mut() {
            if !remaining.is_positive() {
                break;
            }
            if !bill.is_outstanding() {
                continue;
            }
            let pre_image = self.repository.bill_op(bill)?;
            let applied = bill.apply_payment(remaining)?;
            remaining = remaining - applied;
            allocations.push(PaymentAllocation {
                bill_id: bill.id,
                sequence_number: bill.sequence_number,
                amount: applied,
            });
            writes.push(UnitWrite::replacing(self.repository.bill_op(bill)?, pre_image));
        }

        let allocated = allocations
            .iter()
            .fold(Money::zero(self.currency), |acc, a| acc + a.amount);
        let latest_remaining = book
            .bills
            .last()
            .map(|b| b.remaining_amount)
            .unwrap_or_else(|| Money::zero(self.currency));
        book.ledger.record_payment(allocated, remaining, latest_remaining);

        let application = PaymentApplication {
            reference_number: payment.reference_number.clone(),
            payment_id: payment.id,
            account_id: account.id,
            amount: payment.amount,
            allocations,
            excess_to_pool: remaining,
            state: ApplicationState::Committed,
            applied_at: Utc::now(),
        };
        let rolled_back = PaymentApplication {
            state: ApplicationState::RolledBack,
            ..application.clone()
        };

        writes.push(UnitWrite::replacing(
            self.repository.ledger_op(&book.ledger)?,
            self.repository.ledger_op(&ledger_before)?,
        ));
        writes.push(UnitWrite::replacing(
            self.repository.application_op(&application)?,
            self.repository.application_op(&rolled_back)?,
        ));

        if let Err(error) = self.repository.write_unit(&account.id, writes).await {
            warn!(error = %error, "Payment application rolled back");
            return Err(error);
        }

        info!(
            amount = %payment.amount,
            bills_settled = application.allocations.len(),
            excess_to_pool = %application.excess_to_pool,
            "Payment applied"
        );

        let event = BillingEvent::PaymentVerified {
            account_id: account.id,
            amount: payment.amount,
            remaining_ledger_balance: book.ledger.net_balance(),
            timestamp: Utc::now(),
        };
        deliver(self.notifier.as_ref(), vec![event]).await;

        Ok(PaymentOutcome::Applied(application))
    }
}
