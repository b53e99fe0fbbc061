//! Per-account write serialization
//!
//! Every writer of an account's bills or ledger holds that account's lock
//! for the whole read-modify-write. Different accounts never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use core_kernel::AccountId;

/// Process-wide map of account locks
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    /// Creates an empty lock map
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the account's lock and returns a guard that releases it on
    /// drop
    pub async fn acquire(&self, account_id: &AccountId) -> OwnedMutexGuard<()> {
        self.lock_for(account_id).lock_owned().await
    }

    /// Takes the account's lock if nobody holds it
    pub fn try_acquire(&self, account_id: &AccountId) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(account_id).try_lock_owned().ok()
    }

    fn lock_for(&self, account_id: &AccountId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(*account_id).or_default().clone()
    }

    /// Number of accounts that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Returns true if no account has been locked yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
