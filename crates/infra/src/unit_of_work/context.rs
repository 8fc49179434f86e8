use limas_core::PartId;
use limas_inventory::{Part, StockEntry};

use super::UnitOfWorkError;
use super::change_set::EntityChangeSet;
use crate::entity::{EntityKey, EntityRef};

/// Transaction context handed to flush listeners.
///
/// It exposes the pending change set for inspection and a narrow set of mutations:
/// listeners may modify managed parts and re-register their change sets, but cannot
/// schedule new inserts or deletes.
pub trait FlushContext {
    /// Entities scheduled for insert, in registration order.
    fn scheduled_insertions(&self) -> Vec<EntityRef<'_>>;

    /// Entities with a non-empty update change set, in registration order.
    fn scheduled_updates(&self) -> Vec<EntityRef<'_>>;

    /// Entities scheduled for delete, in registration order.
    fn scheduled_deletions(&self) -> Vec<EntityRef<'_>>;

    /// Computed change set of a managed entity, if it has one.
    fn change_set(&self, key: EntityKey) -> Option<&EntityChangeSet>;

    /// Every entry currently referencing `part_id`: committed rows overlaid with the
    /// in-flight state of this transaction (staged inserts and edits included,
    /// staged deletes excluded).
    fn stock_entries_for_part(&self, part_id: PartId) -> Result<Vec<StockEntry>, UnitOfWorkError>;

    /// Load the part into the identity map (pinning its store version) and report
    /// whether it is visible: `false` when it does not exist or is scheduled for
    /// delete.
    fn ensure_part_managed(&mut self, part_id: PartId) -> Result<bool, UnitOfWorkError>;

    /// Managed part, loaded into the identity map on first access.
    ///
    /// `None` when the part does not exist or is scheduled for delete.
    fn managed_part_mut(&mut self, part_id: PartId) -> Result<Option<&mut Part>, UnitOfWorkError>;

    /// Recompute the change set of one entity after it was modified during flush.
    ///
    /// Without this call, modifications made after change-set computation are not
    /// written. A re-registered managed entity is always written with a version
    /// check, even when none of its fields differ from the loaded row.
    fn recompute_single_change_set(&mut self, key: EntityKey) -> Result<(), UnitOfWorkError>;
}
