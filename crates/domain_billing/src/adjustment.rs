//! Credit adjustments against issued bills

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, AdjustmentId, BillId, Money};

/// An append-only credit entry
///
/// `amount` = `applied_to_bill` + `credited_to_pool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillAdjustment {
    pub id: AdjustmentId,
    pub bill_id: BillId,
    pub account_id: AccountId,
    /// Total credit granted
    pub amount: Money,
    /// Part that reduced the bill's remaining amount
    pub applied_to_bill: Money,
    /// Part beyond the remaining amount, added to the overpayment pool
    pub credited_to_pool: Money,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}
