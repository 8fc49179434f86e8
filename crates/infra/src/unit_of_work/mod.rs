//! Transaction-scoped unit of work.
//!
//! The unit of work keeps one managed instance per entity (identity map), remembers
//! what each entity looked like when it was loaded, and turns the difference into
//! change sets right before commit. Flush listeners run between change-set
//! computation and write-set materialization through [`FlushContext`].

pub mod change_set;
pub mod context;
mod identity_map;
pub mod work;

use thiserror::Error;

use limas_core::DomainError;

use crate::entity::EntityKey;
use crate::store::StoreError;

pub use change_set::{EntityChangeSet, FieldChange, PendingOp};
pub use context::FlushContext;
pub use identity_map::EntityState;
pub use work::UnitOfWork;

/// Unit of work / flush error.
///
/// Any of these aborts the transaction before anything reaches the store.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("entity snapshot failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("entity is not managed by this unit of work: {0}")]
    NotManaged(EntityKey),

    #[error("change sets have not been computed yet")]
    ChangeSetsNotComputed,
}
