use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use limas_core::{Entity, ExpectedVersion, PartId, StockEntryId};
use limas_inventory::{Part, StockEntry};

use super::r#trait::{CommitReceipt, Store, StoreError, Versioned, WriteOp, WriteSet};
use crate::entity::{EntityKey, Row};

#[derive(Debug, Default, Clone)]
struct Tables {
    parts: HashMap<PartId, Versioned<Part>>,
    entries: HashMap<StockEntryId, Versioned<StockEntry>>,
    entries_by_part: HashMap<PartId, BTreeSet<StockEntryId>>,
}

/// Rows whose foreign keys must be checked once a write set is fully applied.
#[derive(Debug, Default)]
struct Touched {
    entries: Vec<StockEntryId>,
    deleted_parts: Vec<PartId>,
}

/// In-memory transactional row store.
///
/// Intended for tests/dev. A write set is applied to a copy of the tables which
/// replaces the live tables only when every operation and constraint succeeded.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn part_count(&self) -> Result<usize, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(tables.parts.len())
    }

    pub fn stock_entry_count(&self) -> Result<usize, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(tables.entries.len())
    }
}

impl Tables {
    fn index(&mut self, entry: &StockEntry) {
        if let Some(part_id) = entry.part() {
            self.entries_by_part
                .entry(part_id)
                .or_default()
                .insert(*entry.id());
        }
    }

    fn unindex(&mut self, entry: &StockEntry) {
        if let Some(part_id) = entry.part() {
            if let Some(ids) = self.entries_by_part.get_mut(&part_id) {
                ids.remove(entry.id());
                if ids.is_empty() {
                    self.entries_by_part.remove(&part_id);
                }
            }
        }
    }

    fn apply_op(
        &mut self,
        op: WriteOp,
        receipt: &mut CommitReceipt,
        touched: &mut Touched,
    ) -> Result<(), StoreError> {
        match op {
            WriteOp::Insert(Row::Part(part)) => {
                let id = *part.id();
                if self.parts.contains_key(&id) {
                    return Err(StoreError::DuplicateKey(EntityKey::Part(id)));
                }
                self.parts.insert(id, Versioned { entity: part, version: 1 });
                receipt.inserted += 1;
            }
            WriteOp::Insert(Row::StockEntry(entry)) => {
                let id = *entry.id();
                if self.entries.contains_key(&id) {
                    return Err(StoreError::DuplicateKey(EntityKey::StockEntry(id)));
                }
                self.index(&entry);
                self.entries.insert(id, Versioned { entity: entry, version: 1 });
                touched.entries.push(id);
                receipt.inserted += 1;
            }
            WriteOp::Update {
                row: Row::Part(part),
                expected_version,
            } => {
                let key = EntityKey::Part(*part.id());
                let stored = self
                    .parts
                    .get_mut(part.id())
                    .ok_or(StoreError::NotFound(key))?;
                check_version(key, expected_version, stored.version)?;
                stored.entity = part;
                stored.version += 1;
                receipt.updated += 1;
            }
            WriteOp::Update {
                row: Row::StockEntry(entry),
                expected_version,
            } => {
                let id = *entry.id();
                let key = EntityKey::StockEntry(id);
                let previous = match self.entries.get(&id) {
                    Some(stored) => {
                        check_version(key, expected_version, stored.version)?;
                        stored.clone()
                    }
                    None => return Err(StoreError::NotFound(key)),
                };
                self.unindex(&previous.entity);
                self.index(&entry);
                self.entries.insert(
                    id,
                    Versioned {
                        entity: entry,
                        version: previous.version + 1,
                    },
                );
                touched.entries.push(id);
                receipt.updated += 1;
            }
            WriteOp::Delete {
                key: key @ EntityKey::Part(id),
                expected_version,
            } => {
                let stored = self.parts.get(&id).ok_or(StoreError::NotFound(key))?;
                check_version(key, expected_version, stored.version)?;
                self.parts.remove(&id);
                touched.deleted_parts.push(id);
                receipt.deleted += 1;
            }
            WriteOp::Delete {
                key: key @ EntityKey::StockEntry(id),
                expected_version,
            } => {
                let stored = self.entries.get(&id).ok_or(StoreError::NotFound(key))?;
                check_version(key, expected_version, stored.version)?;
                if let Some(removed) = self.entries.remove(&id) {
                    self.unindex(&removed.entity);
                }
                receipt.deleted += 1;
            }
        }
        Ok(())
    }

    fn check_foreign_keys(&self, touched: &Touched) -> Result<(), StoreError> {
        for id in &touched.entries {
            let Some(stored) = self.entries.get(id) else {
                continue;
            };
            if let Some(part_id) = stored.entity.part() {
                if !self.parts.contains_key(&part_id) {
                    return Err(StoreError::ForeignKey(format!(
                        "stock entry {id} references missing part {part_id}"
                    )));
                }
            }
        }

        for part_id in &touched.deleted_parts {
            if let Some(ids) = self.entries_by_part.get(part_id) {
                if !ids.is_empty() {
                    return Err(StoreError::ForeignKey(format!(
                        "part {part_id} is still referenced by {} stock entries",
                        ids.len()
                    )));
                }
            }
        }

        Ok(())
    }
}

fn check_version(
    key: EntityKey,
    expected_version: ExpectedVersion,
    actual: u64,
) -> Result<(), StoreError> {
    if expected_version.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::Concurrency {
            key,
            detail: format!("expected {expected_version:?}, found {actual}"),
        })
    }
}

impl Store for InMemoryStore {
    fn load_part(&self, id: PartId) -> Result<Option<Versioned<Part>>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(tables.parts.get(&id).cloned())
    }

    fn load_stock_entry(
        &self,
        id: StockEntryId,
    ) -> Result<Option<Versioned<StockEntry>>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;
        Ok(tables.entries.get(&id).cloned())
    }

    fn stock_entries_for_part(
        &self,
        part_id: PartId,
    ) -> Result<Vec<Versioned<StockEntry>>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("read"))?;

        let mut rows: Vec<Versioned<StockEntry>> = tables
            .entries_by_part
            .get(&part_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.entries.get(id).cloned())
            .collect();
        rows.sort_by(|a, b| {
            a.entity
                .date_time()
                .cmp(&b.entity.date_time())
                .then_with(|| a.entity.id().cmp(b.entity.id()))
        });
        Ok(rows)
    }

    fn apply(&self, write_set: WriteSet) -> Result<CommitReceipt, StoreError> {
        if write_set.is_empty() {
            return Ok(CommitReceipt::default());
        }

        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("write"))?;

        let mut staged = tables.clone();
        let mut receipt = CommitReceipt::default();
        let mut touched = Touched::default();

        for op in write_set.into_ops() {
            staged.apply_op(op, &mut receipt, &mut touched)?;
        }
        staged.check_foreign_keys(&touched)?;

        *tables = staged;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn part() -> Part {
        Part::new(PartId::new(), "1k resistor").unwrap()
    }

    fn entry_for(part_id: Option<PartId>, qty: i64) -> StockEntry {
        StockEntry::new(StockEntryId::new(), part_id, qty, Utc::now())
    }

    fn write_set(ops: Vec<WriteOp>) -> WriteSet {
        let mut ws = WriteSet::new();
        for op in ops {
            ws.push(op);
        }
        ws
    }

    #[test]
    fn insert_assigns_version_one_and_indexes_entries() {
        let store = InMemoryStore::new();
        let p = part();
        let e = entry_for(Some(*p.id()), 5);

        let receipt = store
            .apply(write_set(vec![
                WriteOp::Insert(Row::Part(p.clone())),
                WriteOp::Insert(Row::StockEntry(e.clone())),
            ]))
            .unwrap();
        assert_eq!(receipt.inserted, 2);

        assert_eq!(store.load_part(*p.id()).unwrap().unwrap().version, 1);
        let entries = store.stock_entries_for_part(*p.id()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity, e);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = InMemoryStore::new();
        let p = part();
        store
            .apply(write_set(vec![WriteOp::Insert(Row::Part(p.clone()))]))
            .unwrap();

        let err = store
            .apply(write_set(vec![WriteOp::Insert(Row::Part(p.clone()))]))
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateKey(EntityKey::Part(*p.id())));
    }

    #[test]
    fn stale_update_is_rejected() {
        let store = InMemoryStore::new();
        let p = part();
        store
            .apply(write_set(vec![WriteOp::Insert(Row::Part(p.clone()))]))
            .unwrap();
        store
            .apply(write_set(vec![WriteOp::Update {
                row: Row::Part(p.clone()),
                expected_version: ExpectedVersion::Exact(1),
            }]))
            .unwrap();

        let err = store
            .apply(write_set(vec![WriteOp::Update {
                row: Row::Part(p.clone()),
                expected_version: ExpectedVersion::Exact(1),
            }]))
            .unwrap_err();
        match err {
            StoreError::Concurrency { key, .. } => assert_eq!(key, EntityKey::Part(*p.id())),
            _ => panic!("Expected Concurrency error"),
        }
        assert_eq!(store.load_part(*p.id()).unwrap().unwrap().version, 2);
    }

    #[test]
    fn dangling_reference_rolls_back_whole_write_set() {
        let store = InMemoryStore::new();
        let p = part();
        let dangling = entry_for(Some(PartId::new()), 1);

        let err = store
            .apply(write_set(vec![
                WriteOp::Insert(Row::Part(p.clone())),
                WriteOp::Insert(Row::StockEntry(dangling)),
            ]))
            .unwrap_err();
        match err {
            StoreError::ForeignKey(_) => {}
            _ => panic!("Expected ForeignKey error"),
        }
        assert_eq!(store.part_count().unwrap(), 0);
        assert_eq!(store.stock_entry_count().unwrap(), 0);
    }

    #[test]
    fn entry_without_part_is_allowed() {
        let store = InMemoryStore::new();
        store
            .apply(write_set(vec![WriteOp::Insert(Row::StockEntry(entry_for(None, 3)))]))
            .unwrap();
        assert_eq!(store.stock_entry_count().unwrap(), 1);
    }

    #[test]
    fn deleting_referenced_part_is_rejected() {
        let store = InMemoryStore::new();
        let p = part();
        store
            .apply(write_set(vec![
                WriteOp::Insert(Row::Part(p.clone())),
                WriteOp::Insert(Row::StockEntry(entry_for(Some(*p.id()), 2))),
            ]))
            .unwrap();

        let err = store
            .apply(write_set(vec![WriteOp::Delete {
                key: EntityKey::Part(*p.id()),
                expected_version: ExpectedVersion::Any,
            }]))
            .unwrap_err();
        match err {
            StoreError::ForeignKey(msg) => assert!(msg.contains("still referenced")),
            _ => panic!("Expected ForeignKey error"),
        }
        assert!(store.load_part(*p.id()).unwrap().is_some());
    }

    #[test]
    fn reassigning_entry_moves_it_between_part_indexes() {
        let store = InMemoryStore::new();
        let p1 = part();
        let p2 = part();
        let mut e = entry_for(Some(*p1.id()), 4);
        store
            .apply(write_set(vec![
                WriteOp::Insert(Row::Part(p1.clone())),
                WriteOp::Insert(Row::Part(p2.clone())),
                WriteOp::Insert(Row::StockEntry(e.clone())),
            ]))
            .unwrap();

        e.reassign(Some(*p2.id()));
        store
            .apply(write_set(vec![WriteOp::Update {
                row: Row::StockEntry(e.clone()),
                expected_version: ExpectedVersion::Exact(1),
            }]))
            .unwrap();

        assert!(store.stock_entries_for_part(*p1.id()).unwrap().is_empty());
        assert_eq!(store.stock_entries_for_part(*p2.id()).unwrap().len(), 1);
    }
}
