//! Persistence layer: unit of work, flush listeners, stores, configuration.
//!
//! The stock level maintainer runs as a flush listener inside every transaction
//! opened through [`EntityManager`].

pub mod config;
pub mod entity;
pub mod entity_manager;
pub mod listener;
pub mod store;
pub mod unit_of_work;

pub use config::{ConfigError, StockLevelConfig};
pub use entity::{EntityKey, EntityRef, Row};
pub use entity_manager::{EntityManager, Transaction, TransactionError};
pub use listener::{FlushListener, FlushReport, StockLevelMaintainer};
pub use store::{CommitReceipt, InMemoryStore, Store, StoreError};
pub use unit_of_work::{FlushContext, UnitOfWork, UnitOfWorkError};
