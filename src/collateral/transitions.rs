use std::sync::Arc;

use hourglass_rs::SafeTimeProvider;
use tracing::{info, instrument};

use crate::errors::{LedgerError, Result};
use crate::store::ItemStore;
use crate::types::{ActorId, ItemId, ItemStatus};

use super::{Item, ItemHistoryRecord, ItemStatusChange};

/// every permitted item status transition, by source status
pub const ALLOWED_TRANSITIONS: [(ItemStatus, &[ItemStatus]); 6] = [
    (
        ItemStatus::Available,
        &[ItemStatus::Collateral, ItemStatus::ForSale, ItemStatus::Sold, ItemStatus::Transferred],
    ),
    (ItemStatus::Collateral, &[ItemStatus::Available, ItemStatus::Confiscated]),
    (ItemStatus::ForSale, &[ItemStatus::Sold, ItemStatus::Available]),
    (ItemStatus::Sold, &[]),
    (ItemStatus::Confiscated, &[ItemStatus::ForSale, ItemStatus::Available]),
    (ItemStatus::Transferred, &[ItemStatus::Available]),
];

impl ItemStatus {
    /// statuses reachable in one step
    pub fn allowed_transitions(&self) -> &'static [ItemStatus] {
        // exhaustive so a new status cannot silently miss the table
        let index = match self {
            ItemStatus::Available => 0,
            ItemStatus::Collateral => 1,
            ItemStatus::ForSale => 2,
            ItemStatus::Sold => 3,
            ItemStatus::Confiscated => 4,
            ItemStatus::Transferred => 5,
        };
        ALLOWED_TRANSITIONS[index].1
    }

    pub fn can_transition_to(&self, to: ItemStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

/// pure check against the transition table; self-transitions are never valid
pub fn is_valid_status_transition(from: ItemStatus, to: ItemStatus) -> bool {
    from.can_transition_to(to)
}

/// validates and applies item status transitions
pub struct ItemStateMachine {
    items: Arc<dyn ItemStore>,
}

impl ItemStateMachine {
    pub fn new(items: Arc<dyn ItemStore>) -> Self {
        Self { items }
    }

    /// validate a transition and build the change without applying it
    pub fn plan(
        item: &Item,
        to: ItemStatus,
        actor_id: ActorId,
        note: impl Into<String>,
        time_provider: &SafeTimeProvider,
    ) -> Result<ItemStatusChange> {
        if !is_valid_status_transition(item.status, to) {
            return Err(LedgerError::InvalidStatusTransition { from: item.status, to });
        }

        Ok(ItemStatusChange {
            item_id: item.id,
            from: item.status,
            to,
            history: ItemHistoryRecord {
                item_id: item.id,
                old_status: item.status,
                new_status: to,
                actor_id,
                note: note.into(),
                recorded_at: time_provider.now(),
            },
        })
    }

    /// move an item to a new status, recording history
    #[instrument(name = "ledger.item_transition", skip(self, note, time_provider), err)]
    pub fn transition(
        &self,
        item_id: ItemId,
        to: ItemStatus,
        actor_id: ActorId,
        note: &str,
        time_provider: &SafeTimeProvider,
    ) -> Result<Item> {
        let item = self
            .items
            .get_item(item_id)
            .map_err(LedgerError::persistence("load item"))?
            .ok_or(LedgerError::ItemNotFound { id: item_id })?;

        let change = Self::plan(&item, to, actor_id, note, time_provider)?;
        self.items
            .update_status(&change)
            .map_err(LedgerError::persistence("update item status"))?;

        info!(%item_id, from = %change.from, to = %change.to, "item status changed");

        Ok(Item {
            status: to,
            updated_at: change.history.recorded_at,
            ..item
        })
    }

    pub fn history(&self, item_id: ItemId) -> Result<Vec<ItemHistoryRecord>> {
        self.items
            .list_history(item_id)
            .map_err(LedgerError::persistence("list item history"))
    }
}
