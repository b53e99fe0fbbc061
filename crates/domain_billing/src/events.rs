//! Billing events
//!
//! Events are handed to a [`NotificationPort`](crate::ports::NotificationPort)
//! after the documents they describe have been written. Delivery is
//! fire-and-continue: a failed notification never fails the bill or payment
//! that produced it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, Money};
use crate::reading::BillingPeriod;

/// Events emitted by the billing engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEvent {
    /// A bill has been issued
    BillCreated {
        account_id: AccountId,
        billing_period: BillingPeriod,
        due_date: NaiveDate,
        overpayment_applied: Money,
        timestamp: DateTime<Utc>,
    },

    /// The account has reached the unpaid bill threshold
    DisconnectionRisk {
        account_id: AccountId,
        unpaid_bills: usize,
        timestamp: DateTime<Utc>,
    },

    /// A verified payment has been applied
    PaymentVerified {
        account_id: AccountId,
        amount: Money,
        /// Amount due less the overpayment pool, after application
        remaining_ledger_balance: Money,
        timestamp: DateTime<Utc>,
    },

    /// A payment was rejected at verification
    PaymentRejected {
        account_id: AccountId,
        timestamp: DateTime<Utc>,
    },
}

impl BillingEvent {
    /// Returns the account this event concerns
    pub fn account_id(&self) -> AccountId {
        match self {
            BillingEvent::BillCreated { account_id, .. } => *account_id,
            BillingEvent::DisconnectionRisk { account_id, .. } => *account_id,
            BillingEvent::PaymentVerified { account_id, .. } => *account_id,
            BillingEvent::PaymentRejected { account_id, .. } => *account_id,
        }
    }

    /// Returns the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            BillingEvent::BillCreated { timestamp, .. } => *timestamp,
            BillingEvent::DisconnectionRisk { timestamp, .. } => *timestamp,
            BillingEvent::PaymentVerified { timestamp, .. } => *timestamp,
            BillingEvent::PaymentRejected { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            BillingEvent::BillCreated { .. } => "BillCreated",
            BillingEvent::DisconnectionRisk { .. } => "DisconnectionRisk",
            BillingEvent::PaymentVerified { .. } => "PaymentVerified",
            BillingEvent::PaymentRejected { .. } => "PaymentRejected",
        }
    }
}
