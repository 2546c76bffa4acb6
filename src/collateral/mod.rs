pub mod transitions;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{ActorId, BranchId, ItemId, ItemStatus};

pub use transitions::{is_valid_status_transition, ItemStateMachine, ALLOWED_TRANSITIONS};

/// collateral view of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub branch_id: BranchId,
    pub description: String,
    /// the most the shop will lend against this item
    pub loan_value: Money,
    pub status: ItemStatus,
    pub updated_at: DateTime<Utc>,
}

/// immutable record of one status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemHistoryRecord {
    pub item_id: ItemId,
    pub old_status: ItemStatus,
    pub new_status: ItemStatus,
    pub actor_id: ActorId,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

/// validated, not yet applied, status change
///
/// Stores apply it only while the item is still in `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStatusChange {
    pub item_id: ItemId,
    pub from: ItemStatus,
    pub to: ItemStatus,
    pub history: ItemHistoryRecord,
}
