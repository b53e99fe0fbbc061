//! Billing Domain - Water Billing and Account Ledger Engine
//!
//! This crate turns meter readings into bills and keeps every customer
//! account's ledger consistent with the bill documents it summarizes.
//!
//! # Components
//!
//! - **RateSchedule / ChargeCalculator**: tiered water charge, tax, senior
//!   discount, and late penalty
//! - **BillEngine**: issues one bill per account and billing period, applies
//!   the overpayment pool, snapshots arrears, and flags disconnection risk
//! - **PaymentEngine**: applies verified payments to outstanding bills,
//!   oldest first, exactly once per reference number
//! - **BatchRunner**: bills many readings concurrently across accounts
//!   under the store's bulk-write ceiling
//! - **CorrectionEngine**: append-only credit adjustments
//! - **LedgerAuditor**: rebuilds ledgers from source and repairs drift
//!
//! # Conservation
//!
//! For every account, at every point between ledger writes:
//!
//! ```text
//! Σ(original + overpayment applied) − payments − credits = Σ remaining − pool
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillEngine, BillingConfig, BillingRepository, MeterReading};
//!
//! let config = BillingConfig::from_env()?;
//! let engine = BillEngine::new(repository, &config, notifier, locks)?;
//!
//! let bill = engine.issue_bill(&reading).await?;
//! println!("{} due {}", bill.bill_number, bill.original_amount);
//! ```

pub mod account;
pub mod adjustment;
pub mod audit;
pub mod batch;
pub mod bill;
pub mod bill_engine;
pub mod charges;
pub mod config;
pub mod correction;
pub mod error;
pub mod events;
pub mod ledger;
pub mod locks;
pub mod payment;
pub mod payment_engine;
pub mod ports;
pub mod rate_schedule;
pub mod reading;
pub mod repository;

pub use account::CustomerAccount;
pub use adjustment::BillAdjustment;
pub use audit::{AuditReport, LedgerAuditor};
pub use batch::{BatchItemError, BatchReport, BatchRunner, CancellationFlag};
pub use bill::{Bill, BillStatus};
pub use bill_engine::{AccountBook, BillDraft, BillEngine};
pub use charges::{ChargeBreakdown, ChargeCalculator, CreditedCharge};
pub use config::BillingConfig;
pub use correction::CorrectionEngine;
pub use error::BillingError;
pub use events::BillingEvent;
pub use ledger::{LastReading, LedgerDrift, LedgerState};
pub use locks::AccountLocks;
pub use payment::{ApplicationState, Payment, PaymentAllocation, PaymentApplication, PaymentStatus};
pub use payment_engine::{PaymentEngine, PaymentOutcome};
pub use ports::{DocumentStore, Filter, NotificationPort, TracingNotifier, WriteOperation};
pub use rate_schedule::{RateSchedule, RateTier};
pub use reading::{BillingPeriod, MeterReading};
pub use repository::BillingRepository;
