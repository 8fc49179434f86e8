use std::collections::HashMap;

use limas_core::{DomainError, Entity, ExpectedVersion, PartId, StockEntryId};
use limas_inventory::{Part, StockEntry};

use super::UnitOfWorkError;
use super::change_set::{EntityChangeSet, PendingOp, Snapshot, materialize};
use super::context::FlushContext;
use super::identity_map::{EntityState, IdentityMap, Tracked};
use crate::entity::{EntityKey, EntityRef, Row};
use crate::store::{Store, WriteOp, WriteSet};

/// Transaction-scoped unit of work over a [`Store`].
///
/// Lifecycle:
/// 1. entities are persisted, loaded, modified and removed through the identity map;
/// 2. [`compute_change_sets`](Self::compute_change_sets) diffs every managed entity
///    against its load-time snapshot;
/// 3. flush listeners inspect and extend the change sets via [`FlushContext`];
/// 4. [`into_write_set`](Self::into_write_set) turns the change sets (and only the
///    change sets) into store operations.
pub struct UnitOfWork<'s, S: ?Sized> {
    store: &'s S,
    parts: IdentityMap<PartId, Part>,
    entries: IdentityMap<StockEntryId, StockEntry>,
    order: Vec<EntityKey>,
    change_sets: Option<HashMap<EntityKey, EntityChangeSet>>,
}

impl<'s, S> UnitOfWork<'s, S>
where
    S: Store + ?Sized,
{
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            parts: IdentityMap::default(),
            entries: IdentityMap::default(),
            order: Vec::new(),
            change_sets: None,
        }
    }

    pub fn store(&self) -> &'s S {
        self.store
    }

    pub fn persist_part(&mut self, part: Part) -> Result<(), UnitOfWorkError> {
        let id = *part.id();
        if !self.parts.schedule_insert(id, part) {
            return Err(DomainError::conflict(format!("part {id} is already managed")).into());
        }
        self.order.push(EntityKey::Part(id));
        Ok(())
    }

    pub fn persist_stock_entry(&mut self, entry: StockEntry) -> Result<(), UnitOfWorkError> {
        let id = *entry.id();
        if !self.entries.schedule_insert(id, entry) {
            return Err(
                DomainError::conflict(format!("stock entry {id} is already managed")).into(),
            );
        }
        self.order.push(EntityKey::StockEntry(id));
        Ok(())
    }

    pub fn find_part(&mut self, id: PartId) -> Result<Option<&Part>, UnitOfWorkError> {
        self.ensure_part_loaded(id)?;
        Ok(self.parts.get(&id))
    }

    pub fn find_part_mut(&mut self, id: PartId) -> Result<Option<&mut Part>, UnitOfWorkError> {
        self.ensure_part_loaded(id)?;
        Ok(self.parts.get_mut(&id))
    }

    pub fn find_stock_entry(
        &mut self,
        id: StockEntryId,
    ) -> Result<Option<&StockEntry>, UnitOfWorkError> {
        self.ensure_stock_entry_loaded(id)?;
        Ok(self.entries.get(&id))
    }

    pub fn find_stock_entry_mut(
        &mut self,
        id: StockEntryId,
    ) -> Result<Option<&mut StockEntry>, UnitOfWorkError> {
        self.ensure_stock_entry_loaded(id)?;
        Ok(self.entries.get_mut(&id))
    }

    /// Schedule a part for delete. Returns `false` if it does not exist.
    pub fn remove_part(&mut self, id: PartId) -> Result<bool, UnitOfWorkError> {
        self.ensure_part_loaded(id)?;
        let removed = self.parts.remove(&id);
        if removed == Some(EntityState::New) {
            self.order.retain(|k| *k != EntityKey::Part(id));
        }
        Ok(removed.is_some())
    }

    /// Schedule a stock entry for delete. Returns `false` if it does not exist.
    pub fn remove_stock_entry(&mut self, id: StockEntryId) -> Result<bool, UnitOfWorkError> {
        self.ensure_stock_entry_loaded(id)?;
        let removed = self.entries.remove(&id);
        if removed == Some(EntityState::New) {
            self.order.retain(|k| *k != EntityKey::StockEntry(id));
        }
        Ok(removed.is_some())
    }

    pub fn state_of(&self, key: EntityKey) -> Option<EntityState> {
        match key {
            EntityKey::Part(id) => self.parts.tracked(&id).map(|t| t.state),
            EntityKey::StockEntry(id) => self.entries.tracked(&id).map(|t| t.state),
        }
    }

    pub fn has_computed_change_sets(&self) -> bool {
        self.change_sets.is_some()
    }

    /// Diff every managed entity against its load-time snapshot.
    ///
    /// Calling it again discards listener re-registrations and starts over.
    pub fn compute_change_sets(&mut self) -> Result<(), UnitOfWorkError> {
        let mut sets = HashMap::with_capacity(self.order.len());
        for key in &self.order {
            if let Some(cs) = self.build_change_set(*key)? {
                sets.insert(*key, cs);
            }
        }
        self.change_sets = Some(sets);
        Ok(())
    }

    /// Materialize the computed change sets into an ordered write set.
    ///
    /// Inserts come first (parts before entries), then updates, then deletes
    /// (entries before parts). Update rows are the load-time snapshot patched with
    /// the change set, so fields modified after the last change-set computation are
    /// not written.
    pub fn into_write_set(self) -> Result<WriteSet, UnitOfWorkError> {
        let sets = self
            .change_sets
            .as_ref()
            .ok_or(UnitOfWorkError::ChangeSetsNotComputed)?;

        let ordered = |op: PendingOp, parts_first: bool| {
            let mut keys: Vec<EntityKey> = self
                .order
                .iter()
                .copied()
                .filter(|k| sets.get(k).is_some_and(|cs| cs.op() == op))
                .collect();
            keys.sort_by_key(|k| match (k, parts_first) {
                (EntityKey::Part(_), true) | (EntityKey::StockEntry(_), false) => 0,
                _ => 1,
            });
            keys
        };

        let mut write_set = WriteSet::new();

        for key in ordered(PendingOp::Insert, true) {
            let cs = &sets[&key];
            write_set.push(WriteOp::Insert(row_for(key, cs.apply_to(None))?));
        }

        for key in ordered(PendingOp::Update, true) {
            let cs = &sets[&key];
            let (original, version) = self.load_state(key)?;
            write_set.push(WriteOp::Update {
                row: row_for(key, cs.apply_to(Some(original)))?,
                expected_version: ExpectedVersion::Exact(version),
            });
        }

        for key in ordered(PendingOp::Delete, false) {
            let (_, version) = self.load_state(key)?;
            write_set.push(WriteOp::Delete {
                key,
                expected_version: ExpectedVersion::Exact(version),
            });
        }

        Ok(write_set)
    }

    fn load_state(
        &self,
        key: EntityKey,
    ) -> Result<(&Snapshot, u64), UnitOfWorkError> {
        fn of<T>(t: Option<&Tracked<T>>) -> Option<(&Snapshot, u64)> {
            let t = t?;
            Some((t.original.as_ref()?, t.version?))
        }
        let state = match key {
            EntityKey::Part(id) => of(self.parts.tracked(&id)),
            EntityKey::StockEntry(id) => of(self.entries.tracked(&id)),
        };
        state.ok_or(UnitOfWorkError::NotManaged(key))
    }

    fn ensure_part_loaded(&mut self, id: PartId) -> Result<(), UnitOfWorkError> {
        if self.parts.contains(&id) {
            return Ok(());
        }
        if let Some(row) = self.store.load_part(id)? {
            self.parts.manage_loaded(id, row)?;
            self.order.push(EntityKey::Part(id));
        }
        Ok(())
    }

    fn ensure_stock_entry_loaded(&mut self, id: StockEntryId) -> Result<(), UnitOfWorkError> {
        if self.entries.contains(&id) {
            return Ok(());
        }
        if let Some(row) = self.store.load_stock_entry(id)? {
            self.entries.manage_loaded(id, row)?;
            self.order.push(EntityKey::StockEntry(id));
        }
        Ok(())
    }

    fn build_change_set(&self, key: EntityKey) -> Result<Option<EntityChangeSet>, UnitOfWorkError> {
        let cs = match key {
            EntityKey::Part(id) => self.parts.tracked(&id).map(|t| t.change_set(key)),
            EntityKey::StockEntry(id) => self.entries.tracked(&id).map(|t| t.change_set(key)),
        };
        match cs {
            Some(result) => Ok(result?),
            None => Err(UnitOfWorkError::NotManaged(key)),
        }
    }

    fn entity_ref(&self, key: EntityKey) -> Option<EntityRef<'_>> {
        match key {
            EntityKey::Part(id) => self.parts.tracked(&id).map(|t| EntityRef::Part(&t.entity)),
            EntityKey::StockEntry(id) => self
                .entries
                .tracked(&id)
                .map(|t| EntityRef::StockEntry(&t.entity)),
        }
    }

    fn scheduled(&self, filter: impl Fn(EntityKey) -> bool) -> Vec<EntityRef<'_>> {
        self.order
            .iter()
            .copied()
            .filter(|k| filter(*k))
            .filter_map(|k| self.entity_ref(k))
            .collect()
    }
}

fn row_for(key: EntityKey, row: Snapshot) -> Result<Row, UnitOfWorkError> {
    Ok(match key {
        EntityKey::Part(_) => Row::Part(materialize(row)?),
        EntityKey::StockEntry(_) => Row::StockEntry(materialize(row)?),
    })
}

impl<S> FlushContext for UnitOfWork<'_, S>
where
    S: Store + ?Sized,
{
    fn scheduled_insertions(&self) -> Vec<EntityRef<'_>> {
        self.scheduled(|k| self.state_of(k) == Some(EntityState::New))
    }

    fn scheduled_updates(&self) -> Vec<EntityRef<'_>> {
        let Some(sets) = self.change_sets.as_ref() else {
            return Vec::new();
        };
        self.scheduled(|k| sets.get(&k).is_some_and(|cs| cs.op() == PendingOp::Update))
    }

    fn scheduled_deletions(&self) -> Vec<EntityRef<'_>> {
        self.scheduled(|k| self.state_of(k) == Some(EntityState::Removed))
    }

    fn change_set(&self, key: EntityKey) -> Option<&EntityChangeSet> {
        self.change_sets.as_ref()?.get(&key)
    }

    fn stock_entries_for_part(&self, part_id: PartId) -> Result<Vec<StockEntry>, UnitOfWorkError> {
        let mut entries: Vec<StockEntry> = self
            .store
            .stock_entries_for_part(part_id)?
            .into_iter()
            .filter(|row| !self.entries.contains(row.entity.id()))
            .map(|row| row.entity)
            .collect();

        entries.extend(
            self.entries
                .values()
                .filter(|t| t.state != EntityState::Removed)
                .filter(|t| t.entity.part() == Some(part_id))
                .map(|t| t.entity.clone()),
        );

        Ok(entries)
    }

    fn ensure_part_managed(&mut self, part_id: PartId) -> Result<bool, UnitOfWorkError> {
        self.ensure_part_loaded(part_id)?;
        Ok(self.parts.get(&part_id).is_some())
    }

    fn managed_part_mut(&mut self, part_id: PartId) -> Result<Option<&mut Part>, UnitOfWorkError> {
        self.find_part_mut(part_id)
    }

    fn recompute_single_change_set(&mut self, key: EntityKey) -> Result<(), UnitOfWorkError> {
        if self.change_sets.is_none() {
            return Err(UnitOfWorkError::ChangeSetsNotComputed);
        }
        if !matches!(
            self.state_of(key),
            Some(EntityState::New) | Some(EntityState::Managed)
        ) {
            return Err(UnitOfWorkError::NotManaged(key));
        }

        // A managed entity whose fields ended up unchanged is still written, so a
        // concurrent writer of the same row fails its version check.
        let rebuilt = self
            .build_change_set(key)?
            .unwrap_or_else(|| EntityChangeSet::touch(key));
        if let Some(sets) = self.change_sets.as_mut() {
            sets.insert(key, rebuilt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::store::{InMemoryStore, Store};

    fn seeded_store(part: &Part, entries: &[StockEntry]) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut ws = WriteSet::new();
        ws.push(WriteOp::Insert(Row::Part(part.clone())));
        for e in entries {
            ws.push(WriteOp::Insert(Row::StockEntry(e.clone())));
        }
        store.apply(ws).unwrap();
        store
    }

    fn test_part() -> Part {
        Part::new(PartId::new(), "LM317 regulator").unwrap()
    }

    fn entry_for(part: &Part, qty: i64) -> StockEntry {
        StockEntry::new(StockEntryId::new(), Some(*part.id()), qty, Utc::now())
    }

    #[test]
    fn persisting_same_id_twice_is_a_conflict() {
        let store = InMemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let part = test_part();

        uow.persist_part(part.clone()).unwrap();
        let err = uow.persist_part(part).unwrap_err();
        assert!(matches!(err, UnitOfWorkError::Domain(DomainError::Conflict(_))));
    }

    #[test]
    fn find_returns_the_same_managed_instance() {
        let part = test_part();
        let store = seeded_store(&part, &[]);
        let mut uow = UnitOfWork::new(&store);

        uow.find_part_mut(*part.id()).unwrap().unwrap().rename("LM317T").unwrap();
        assert_eq!(uow.find_part(*part.id()).unwrap().unwrap().name(), "LM317T");
        assert_eq!(uow.state_of(EntityKey::Part(*part.id())), Some(EntityState::Managed));
    }

    #[test]
    fn unchanged_loaded_entity_produces_no_write() {
        let part = test_part();
        let store = seeded_store(&part, &[]);
        let mut uow = UnitOfWork::new(&store);

        uow.find_part(*part.id()).unwrap();
        uow.compute_change_sets().unwrap();
        assert!(uow.into_write_set().unwrap().is_empty());
    }

    #[test]
    fn write_set_requires_computed_change_sets() {
        let store = InMemoryStore::new();
        let uow = UnitOfWork::new(&store);
        assert!(matches!(
            uow.into_write_set(),
            Err(UnitOfWorkError::ChangeSetsNotComputed)
        ));
    }

    #[test]
    fn mutation_after_computation_is_dropped_unless_recomputed() {
        let part = test_part();
        let entry = entry_for(&part, 10);
        let store = seeded_store(&part, &[entry.clone()]);

        let mut uow = UnitOfWork::new(&store);
        uow.find_part(*part.id()).unwrap();
        uow.compute_change_sets().unwrap();
        uow.find_part_mut(*part.id())
            .unwrap()
            .unwrap()
            .recompute_stock_levels([&entry])
            .unwrap();
        assert!(uow.into_write_set().unwrap().is_empty());

        let mut uow = UnitOfWork::new(&store);
        uow.find_part(*part.id()).unwrap();
        uow.compute_change_sets().unwrap();
        uow.find_part_mut(*part.id())
            .unwrap()
            .unwrap()
            .recompute_stock_levels([&entry])
            .unwrap();
        uow.recompute_single_change_set(EntityKey::Part(*part.id()))
            .unwrap();

        let ws = uow.into_write_set().unwrap();
        assert_eq!(ws.len(), 1);
        match &ws.ops()[0] {
            WriteOp::Update {
                row: Row::Part(p),
                expected_version,
            } => {
                assert_eq!(p.stock_level(), 10);
                assert_eq!(*expected_version, ExpectedVersion::Exact(1));
            }
            other => panic!("Expected part update, got {other:?}"),
        }
    }

    #[test]
    fn reregistered_unchanged_entity_is_written_with_version_check() {
        let part = test_part();
        let store = seeded_store(&part, &[]);

        let mut uow = UnitOfWork::new(&store);
        uow.find_part(*part.id()).unwrap();
        assert!(!uow.has_computed_change_sets());
        uow.compute_change_sets().unwrap();
        assert!(uow.has_computed_change_sets());
        assert!(uow.change_set(EntityKey::Part(*part.id())).is_none());

        uow.find_part_mut(*part.id())
            .unwrap()
            .unwrap()
            .recompute_stock_levels([])
            .unwrap();
        uow.recompute_single_change_set(EntityKey::Part(*part.id()))
            .unwrap();
        assert_eq!(uow.scheduled_updates().len(), 1);

        let ws = uow.into_write_set().unwrap();
        assert_eq!(
            ws.ops(),
            &[WriteOp::Update {
                row: Row::Part(part.clone()),
                expected_version: ExpectedVersion::Exact(1),
            }]
        );

        store.apply(ws).unwrap();
        assert_eq!(store.load_part(*part.id()).unwrap().unwrap().version, 2);
    }

    #[test]
    fn recompute_before_computation_is_rejected() {
        let store = InMemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let part = test_part();
        let key = EntityKey::Part(*part.id());
        uow.persist_part(part).unwrap();

        assert!(matches!(
            uow.recompute_single_change_set(key),
            Err(UnitOfWorkError::ChangeSetsNotComputed)
        ));
    }

    #[test]
    fn recompute_of_unknown_entity_is_rejected() {
        let store = InMemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        uow.compute_change_sets().unwrap();

        let key = EntityKey::Part(PartId::new());
        assert!(matches!(
            uow.recompute_single_change_set(key),
            Err(UnitOfWorkError::NotManaged(k)) if k == key
        ));
    }

    #[test]
    fn removing_new_entity_unschedules_it() {
        let store = InMemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let part = test_part();
        let id = *part.id();

        uow.persist_part(part).unwrap();
        assert!(uow.remove_part(id).unwrap());
        uow.compute_change_sets().unwrap();

        assert!(uow.scheduled_insertions().is_empty());
        assert!(uow.scheduled_deletions().is_empty());
        assert!(uow.into_write_set().unwrap().is_empty());
    }

    #[test]
    fn removing_unknown_entity_reports_false() {
        let store = InMemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        assert!(!uow.remove_stock_entry(StockEntryId::new()).unwrap());
    }

    #[test]
    fn scheduled_views_follow_lifecycle() {
        let part = test_part();
        let kept = entry_for(&part, 5);
        let dropped = entry_for(&part, 2);
        let store = seeded_store(&part, &[kept.clone(), dropped.clone()]);

        let mut uow = UnitOfWork::new(&store);
        let added = entry_for(&part, 1);
        uow.persist_stock_entry(added.clone()).unwrap();
        uow.find_stock_entry_mut(*kept.id())
            .unwrap()
            .unwrap()
            .correct_stock_level(4);
        uow.remove_stock_entry(*dropped.id()).unwrap();
        uow.compute_change_sets().unwrap();

        assert_eq!(uow.scheduled_insertions(), vec![EntityRef::StockEntry(&added)]);
        assert_eq!(uow.scheduled_updates().len(), 1);
        assert_eq!(uow.scheduled_updates()[0].key(), EntityKey::StockEntry(*kept.id()));
        assert_eq!(uow.scheduled_deletions(), vec![EntityRef::StockEntry(&dropped)]);

        let cs = uow.change_set(EntityKey::StockEntry(*kept.id())).unwrap();
        assert_eq!(cs.op(), PendingOp::Update);
        assert!(cs.changes("stock_level"));
        assert!(cs.changes("correction"));
    }

    #[test]
    fn in_flight_entries_overlay_committed_rows() {
        let part = test_part();
        let kept = entry_for(&part, 5);
        let edited = entry_for(&part, 10);
        let dropped = entry_for(&part, 2);
        let store = seeded_store(&part, &[kept.clone(), edited.clone(), dropped.clone()]);

        let mut uow = UnitOfWork::new(&store);
        uow.persist_stock_entry(entry_for(&part, -1)).unwrap();
        uow.find_stock_entry_mut(*edited.id())
            .unwrap()
            .unwrap()
            .correct_stock_level(4);
        uow.remove_stock_entry(*dropped.id()).unwrap();

        let entries = uow.stock_entries_for_part(*part.id()).unwrap();
        let total: i64 = entries.iter().map(|e| e.stock_level()).sum();
        assert_eq!(entries.len(), 3);
        assert_eq!(total, 5 + 4 - 1);
    }

    #[test]
    fn write_set_orders_inserts_updates_and_deletes() {
        let part = test_part();
        let old = entry_for(&part, 3);
        let store = seeded_store(&part, &[old.clone()]);

        let mut uow = UnitOfWork::new(&store);
        let new_part = test_part();
        let new_entry = entry_for(&new_part, 7);
        uow.persist_stock_entry(new_entry).unwrap();
        uow.persist_part(new_part).unwrap();
        uow.find_part_mut(*part.id()).unwrap().unwrap().rename("renamed").unwrap();
        uow.remove_stock_entry(*old.id()).unwrap();
        uow.compute_change_sets().unwrap();

        let kinds: Vec<(&str, &str)> = uow
            .into_write_set()
            .unwrap()
            .ops()
            .iter()
            .map(|op| {
                let verb = match op {
                    WriteOp::Insert(_) => "insert",
                    WriteOp::Update { .. } => "update",
                    WriteOp::Delete { .. } => "delete",
                };
                (verb, op.key().kind())
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("insert", "part"),
                ("insert", "stock_entry"),
                ("update", "part"),
                ("delete", "stock_entry"),
            ]
        );
    }
}
