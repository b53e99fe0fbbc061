//! Core Kernel - Foundational types for the water billing engine
//!
//! This crate provides the building blocks shared by the billing domain:
//! - Money types with exact decimal arithmetic and presentation-only rounding
//! - Strongly-typed identifiers for accounts, bills, payments, and adjustments
//! - Port infrastructure (error type, marker traits, health checks) for
//!   swappable persistence and notification adapters

pub mod money;
pub mod identifiers;
pub mod ports;

pub use money::{Money, Currency, MoneyError, Rate};
pub use identifiers::{AccountId, BillId, AdjustmentId, PaymentId, IdParseError};
pub use ports::{PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth};
