//! Row store boundary.
//!
//! This module defines an infrastructure-facing abstraction for loading parts and
//! stock entries and for applying a transaction's write set atomically, without
//! making any storage assumptions.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use r#trait::{CommitReceipt, Store, StoreError, Versioned, WriteOp, WriteSet};
