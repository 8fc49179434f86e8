use std::sync::Arc;

use thiserror::Error;

use limas_core::{ExpectedVersion, PartId, StockEntryId};
use limas_inventory::{Part, StockEntry};

use crate::entity::{EntityKey, Row};

/// A stored row together with its version.
///
/// Versions start at 1 on insert and grow by one on every update. The unit of work
/// remembers the version it loaded and sends it back as an [`ExpectedVersion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub entity: T,
    pub version: u64,
}

/// One row-level operation of a write set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Insert(Row),
    Update {
        row: Row,
        expected_version: ExpectedVersion,
    },
    Delete {
        key: EntityKey,
        expected_version: ExpectedVersion,
    },
}

impl WriteOp {
    pub fn key(&self) -> EntityKey {
        match self {
            WriteOp::Insert(row) => row.key(),
            WriteOp::Update { row, .. } => row.key(),
            WriteOp::Delete { key, .. } => *key,
        }
    }
}

/// Ordered list of operations that must be applied as one atomic unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    ops: Vec<WriteOp>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Row counts of an applied write set.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Store operation error.
///
/// These are **infrastructure errors** (constraints, concurrency) as opposed to
/// domain errors (validation, invariants). Any of them means nothing was written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(EntityKey),

    #[error("optimistic concurrency check failed for {key}: {detail}")]
    Concurrency { key: EntityKey, detail: String },

    #[error("row not found: {0}")]
    NotFound(EntityKey),

    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

/// Transactional row store for parts and stock entries.
///
/// ## Apply Semantics
///
/// `apply()`:
/// - Rejects inserts of keys that already exist
/// - Checks optimistic concurrency on updates and deletes
/// - Checks foreign keys once all operations are applied (entry -> part, and no
///   entry may keep referencing a deleted part)
/// - Persists the whole write set atomically (all or nothing)
///
/// Isolation between concurrent transactions is provided by these checks; callers
/// never lock rows themselves.
pub trait Store: Send + Sync {
    fn load_part(&self, id: PartId) -> Result<Option<Versioned<Part>>, StoreError>;

    fn load_stock_entry(
        &self,
        id: StockEntryId,
    ) -> Result<Option<Versioned<StockEntry>>, StoreError>;

    /// All committed entries referencing `part_id`, in ledger order.
    fn stock_entries_for_part(
        &self,
        part_id: PartId,
    ) -> Result<Vec<Versioned<StockEntry>>, StoreError>;

    fn apply(&self, write_set: WriteSet) -> Result<CommitReceipt, StoreError>;
}

impl<S> Store for Arc<S>
where
    S: Store + ?Sized,
{
    fn load_part(&self, id: PartId) -> Result<Option<Versioned<Part>>, StoreError> {
        (**self).load_part(id)
    }

    fn load_stock_entry(
        &self,
        id: StockEntryId,
    ) -> Result<Option<Versioned<StockEntry>>, StoreError> {
        (**self).load_stock_entry(id)
    }

    fn stock_entries_for_part(
        &self,
        part_id: PartId,
    ) -> Result<Vec<Versioned<StockEntry>>, StoreError> {
        (**self).stock_entries_for_part(part_id)
    }

    fn apply(&self, write_set: WriteSet) -> Result<CommitReceipt, StoreError> {
        (**self).apply(write_set)
    }
}
