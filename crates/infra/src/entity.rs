//! Typed handles for the entity kinds the persistence layer manages.
//!
//! Listeners receive [`EntityRef`] values and match on the variant they care about;
//! there is no runtime type inspection.

use limas_core::{Entity, PartId, StockEntryId};
use limas_inventory::{Part, StockEntry};

/// Stable identity of a managed entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Part(PartId),
    StockEntry(StockEntryId),
}

impl EntityKey {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityKey::Part(_) => "part",
            EntityKey::StockEntry(_) => "stock_entry",
        }
    }
}

impl core::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntityKey::Part(id) => write!(f, "part:{id}"),
            EntityKey::StockEntry(id) => write!(f, "stock_entry:{id}"),
        }
    }
}

/// Borrowed view of a managed entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntityRef<'a> {
    Part(&'a Part),
    StockEntry(&'a StockEntry),
}

impl EntityRef<'_> {
    pub fn key(&self) -> EntityKey {
        match self {
            EntityRef::Part(p) => EntityKey::Part(*p.id()),
            EntityRef::StockEntry(e) => EntityKey::StockEntry(*e.id()),
        }
    }
}

/// Owned row as written to (and read from) a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Part(Part),
    StockEntry(StockEntry),
}

impl Row {
    pub fn key(&self) -> EntityKey {
        match self {
            Row::Part(p) => EntityKey::Part(*p.id()),
            Row::StockEntry(e) => EntityKey::StockEntry(*e.id()),
        }
    }
}
