//! Inventory domain module.
//!
//! This crate contains the part/stock ledger model and the pure stock-level
//! recomputation, implemented as deterministic domain logic (no IO, no storage).

pub mod part;
pub mod stock_entry;
pub mod stock_levels;

pub use part::Part;
pub use stock_entry::StockEntry;
pub use stock_levels::StockLevels;
