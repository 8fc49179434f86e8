//! Transaction pipeline (application-level orchestration).
//!
//! ## Commit Flow
//!
//! ```text
//! Transaction (persist / find / modify / remove)
//!   ↓
//! 1. Compute change sets (diff against load-time snapshots)
//!   ↓
//! 2. Run flush listeners (may modify managed parts and re-register them)
//!   ↓
//! 3. Materialize the write set from the change sets
//!   ↓
//! 4. Apply atomically (optimistic versions, deferred foreign keys)
//! ```
//!
//! A failure in any step leaves the store untouched.

use thiserror::Error;
use tracing::{debug, debug_span, warn};

use limas_core::{PartId, StockEntryId};
use limas_inventory::{Part, StockEntry};

use crate::config::StockLevelConfig;
use crate::entity::EntityKey;
use crate::listener::{FlushListener, StockLevelMaintainer};
use crate::store::{CommitReceipt, Store, StoreError};
use crate::unit_of_work::{EntityState, UnitOfWork, UnitOfWorkError};

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),

    #[error("commit rejected by store: {0}")]
    Store(#[from] StoreError),

    #[error("flush listener `{listener}` failed: {source}")]
    Listener {
        listener: &'static str,
        #[source]
        source: UnitOfWorkError,
    },
}

impl TransactionError {
    /// True when the commit lost an optimistic concurrency race and may be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransactionError::Store(StoreError::Concurrency { .. }))
    }
}

/// Owns the store and the flush listeners; opens transactions.
///
/// Listeners run in registration order on every commit.
pub struct EntityManager<S> {
    store: S,
    listeners: Vec<Box<dyn FlushListener>>,
}

impl<S> EntityManager<S>
where
    S: Store,
{
    /// Manager without listeners.
    pub fn new(store: S) -> Self {
        Self {
            store,
            listeners: Vec::new(),
        }
    }

    /// Manager with the stock level maintainer registered.
    pub fn with_config(store: S, config: StockLevelConfig) -> Self {
        Self::new(store).with_listener(StockLevelMaintainer::new(config))
    }

    pub fn with_listener(mut self, listener: impl FlushListener + 'static) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn listener_names(&self) -> Vec<&'static str> {
        self.listeners.iter().map(|l| l.name()).collect()
    }

    pub fn begin(&self) -> Transaction<'_, S> {
        Transaction {
            uow: UnitOfWork::new(&self.store),
            listeners: &self.listeners,
        }
    }
}

impl<S> core::fmt::Debug for EntityManager<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EntityManager")
            .field(
                "listeners",
                &self.listeners.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// One unit of work bound to a manager's store and listeners.
///
/// Dropping a transaction without committing discards it.
pub struct Transaction<'m, S> {
    uow: UnitOfWork<'m, S>,
    listeners: &'m [Box<dyn FlushListener>],
}

impl<'m, S> Transaction<'m, S>
where
    S: Store,
{
    pub fn persist_part(&mut self, part: Part) -> Result<(), TransactionError> {
        Ok(self.uow.persist_part(part)?)
    }

    pub fn persist_stock_entry(&mut self, entry: StockEntry) -> Result<(), TransactionError> {
        Ok(self.uow.persist_stock_entry(entry)?)
    }

    pub fn find_part(&mut self, id: PartId) -> Result<Option<&Part>, TransactionError> {
        Ok(self.uow.find_part(id)?)
    }

    pub fn find_part_mut(&mut self, id: PartId) -> Result<Option<&mut Part>, TransactionError> {
        Ok(self.uow.find_part_mut(id)?)
    }

    pub fn find_stock_entry(
        &mut self,
        id: StockEntryId,
    ) -> Result<Option<&StockEntry>, TransactionError> {
        Ok(self.uow.find_stock_entry(id)?)
    }

    pub fn find_stock_entry_mut(
        &mut self,
        id: StockEntryId,
    ) -> Result<Option<&mut StockEntry>, TransactionError> {
        Ok(self.uow.find_stock_entry_mut(id)?)
    }

    pub fn remove_part(&mut self, id: PartId) -> Result<bool, TransactionError> {
        Ok(self.uow.remove_part(id)?)
    }

    pub fn remove_stock_entry(&mut self, id: StockEntryId) -> Result<bool, TransactionError> {
        Ok(self.uow.remove_stock_entry(id)?)
    }

    pub fn state_of(&self, key: EntityKey) -> Option<EntityState> {
        self.uow.state_of(key)
    }

    /// Flush and commit.
    ///
    /// Returns the store's receipt. Nothing is written when any step fails.
    pub fn commit(mut self) -> Result<CommitReceipt, TransactionError> {
        let span = debug_span!("commit", listeners = self.listeners.len());
        let _guard = span.enter();

        // 1) Change sets
        self.uow.compute_change_sets()?;

        // 2) Flush listeners
        for listener in self.listeners {
            listener
                .on_flush(&mut self.uow)
                .map_err(|source| TransactionError::Listener {
                    listener: listener.name(),
                    source,
                })?;
        }

        // 3) Write set (only what the change sets carry)
        let store = self.uow.store();
        let write_set = self.uow.into_write_set()?;
        if write_set.is_empty() {
            debug!("nothing to commit");
            return Ok(CommitReceipt::default());
        }

        // 4) Atomic apply
        let ops = write_set.len();
        match store.apply(write_set) {
            Ok(receipt) => {
                debug!(
                    ops,
                    inserted = receipt.inserted,
                    updated = receipt.updated,
                    deleted = receipt.deleted,
                    "transaction committed"
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(ops, error = %err, "transaction rolled back by store");
                Err(err.into())
            }
        }
    }

    /// Discard every staged change.
    pub fn rollback(self) {
        debug!("transaction rolled back");
    }
}
