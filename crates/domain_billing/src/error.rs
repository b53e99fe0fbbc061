//! Billing domain errors

use core_kernel::PortError;
use thiserror::Error;

/// Errors that can occur in the billing domain
///
/// Per-item errors (one reading, one payment) are caught and counted by the
/// batch layer; none of them may leave another account's ledger modified.
#[derive(Debug, Error)]
pub enum BillingError {
    /// The reading cannot be billed (negative consumption, bad period)
    #[error("Invalid reading for account {account_id}: {reason}")]
    InvalidReading {
        account_id: String,
        reason: String,
    },

    /// A bill already exists for the account and billing period
    #[error("Bill already exists for account {account_id} in period {billing_period}")]
    DuplicateBillingPeriod {
        account_id: String,
        billing_period: String,
    },

    /// No customer account matches
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    /// The payment-application unit could not be persisted as a whole
    #[error("Ledger write failed for account {account_id}: {reason}")]
    LedgerWriteFailed {
        account_id: String,
        reason: String,
    },

    /// The document store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A payment that has not been verified reached the engine
    #[error("Payment {0} is not verified")]
    PaymentNotVerified(String),

    /// Payment amount is unusable
    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    /// Rate tiers are malformed
    #[error("Invalid rate schedule: {0}")]
    InvalidRateSchedule(String),

    /// Correction request is unusable
    #[error("Invalid adjustment: {0}")]
    InvalidAdjustment(String),

    /// Bill not found
    #[error("Bill not found: {0}")]
    BillNotFound(String),

    /// A ledger invariant would be broken; this is a defect, not a runtime condition
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A stored document could not be mapped to its domain type
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BillingError {
    /// Creates an invalid reading error
    pub fn invalid_reading(account_id: impl ToString, reason: impl Into<String>) -> Self {
        BillingError::InvalidReading {
            account_id: account_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a ledger write failure
    pub fn ledger_write_failed(account_id: impl ToString, reason: impl Into<String>) -> Self {
        BillingError::LedgerWriteFailed {
            account_id: account_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors worth retrying as a whole unit
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingError::StoreUnavailable(_) | BillingError::LedgerWriteFailed { .. }
        )
    }

    /// Errors that mean "do not bill this item" rather than "billing failed"
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidReading { .. } | BillingError::DuplicateBillingPeriod { .. }
        )
    }

    /// Short machine-readable code for batch reports
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::InvalidReading { .. } => "invalid_reading",
            BillingError::DuplicateBillingPeriod { .. } => "duplicate_billing_period",
            BillingError::UnknownAccount(_) => "unknown_account",
            BillingError::LedgerWriteFailed { .. } => "ledger_write_failed",
            BillingError::StoreUnavailable(_) => "store_unavailable",
            BillingError::PaymentNotVerified(_) => "payment_not_verified",
            BillingError::InvalidPayment(_) => "invalid_payment",
            BillingError::InvalidRateSchedule(_) => "invalid_rate_schedule",
            BillingError::InvalidAdjustment(_) => "invalid_adjustment",
            BillingError::BillNotFound(_) => "bill_not_found",
            BillingError::InvariantViolation(_) => "invariant_violation",
            BillingError::Serialization(_) => "serialization",
            BillingError::Configuration(_) => "configuration",
        }
    }
}

impl From<PortError> for BillingError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::Transformation { message } => BillingError::Serialization(message),
            other => BillingError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for BillingError {
    fn from(error: config::ConfigError) -> Self {
        BillingError::Configuration(error.to_string())
    }
}
