//! Pre-flush listeners.
//!
//! A listener runs once per commit, after change sets were computed and before they
//! are turned into a write set. Listeners run in registration order; the first error
//! aborts the transaction.

pub mod stock_level;

use crate::unit_of_work::{FlushContext, UnitOfWorkError};

pub use stock_level::{FlushReport, StockLevelMaintainer};

pub trait FlushListener: Send + Sync {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    fn on_flush(&self, ctx: &mut dyn FlushContext) -> Result<(), UnitOfWorkError>;
}
