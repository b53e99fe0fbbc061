//! Billing Test Harness
//!
//! Wires every engine over one in-memory store and one set of account
//! locks, the way a host process would.

use std::sync::Arc;

use core_kernel::AccountId;
use domain_billing::ports::mock::{InMemoryStore, RecordingNotifier};
use domain_billing::{
    BatchRunner, BillEngine, BillingConfig, BillingRepository, CorrectionEngine, CustomerAccount,
    LedgerAuditor, LedgerState, AccountLocks, PaymentEngine,
};

/// A complete billing stack for integration tests
pub struct BillingHarness {
    pub config: BillingConfig,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub locks: Arc<AccountLocks>,
    pub repository: BillingRepository,
    pub bills: Arc<BillEngine>,
    pub payments: PaymentEngine,
    pub corrections: CorrectionEngine,
    pub auditor: LedgerAuditor,
    pub batch: BatchRunner,
}

impl BillingHarness {
    /// Default configuration over a store with the default ceiling
    pub fn new() -> Self {
        Self::with_config(BillingConfig::default(), InMemoryStore::new())
    }

    /// Custom configuration and store
    pub fn with_config(config: BillingConfig, store: InMemoryStore) -> Self {
        let store = Arc::new(store);
        let notifier = Arc::new(RecordingNotifier::new());
        let locks = Arc::new(AccountLocks::new());
        let repository = BillingRepository::new(store.clone());
        let bills = Arc::new(
            BillEngine::new(repository.clone(), &config, notifier.clone(), locks.clone())
                .expect("valid test configuration"),
        );
        let payments = PaymentEngine::new(
            repository.clone(),
            notifier.clone(),
            locks.clone(),
            config.currency,
        );
        let corrections = CorrectionEngine::new(repository.clone(), locks.clone(), config.currency);
        let auditor = LedgerAuditor::new(repository.clone(), locks.clone(), config.currency);
        let batch = BatchRunner::new(bills.clone(), auditor.clone(), &config);

        Self {
            config,
            store,
            notifier,
            locks,
            repository,
            bills,
            payments,
            corrections,
            auditor,
            batch,
        }
    }

    /// Saves an account to the store and returns it
    pub async fn open_account(&self, account: CustomerAccount) -> CustomerAccount {
        self.repository
            .save_account(&account)
            .await
            .expect("account saved");
        account
    }

    /// The stored ledger, which must exist
    pub async fn ledger(&self, account_id: &AccountId) -> LedgerState {
        self.repository
            .ledger(account_id)
            .await
            .expect("ledger readable")
            .expect("ledger exists")
    }
}

impl Default for BillingHarness {
    fn default() -> Self {
        Self::new()
    }
}
