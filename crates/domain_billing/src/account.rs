//! Customer accounts
//!
//! Accounts are maintained by the customer registry; the billing core only
//! reads them to resolve the holder and the senior citizen flag.

use serde::{Deserialize, Serialize};

use core_kernel::AccountId;

/// A water service account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAccount {
    /// Unique identifier
    pub id: AccountId,
    /// Account number printed on bills
    pub account_number: String,
    /// Registered holder
    pub holder_name: String,
    /// Senior citizens get a discount on the taxed subtotal
    pub is_senior: bool,
    /// Inactive accounts are still billed for readings already taken
    pub is_active: bool,
}

impl CustomerAccount {
    /// Creates an active, non-senior account
    pub fn new(account_number: impl Into<String>, holder_name: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            account_number: account_number.into(),
            holder_name: holder_name.into(),
            is_senior: false,
            is_active: true,
        }
    }

    /// Marks the holder as a senior citizen
    pub fn senior(mut self) -> Self {
        self.is_senior = true;
        self
    }
}
