use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use limas_core::{DomainError, DomainResult, Entity, PartId};

use crate::stock_entry::StockEntry;
use crate::stock_levels::StockLevels;

/// Inventory part: the owner of derived stock figures.
///
/// `stock_level`, `average_price` and `low_stock` are never set by callers; they
/// only change through [`Part::recompute_stock_levels`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    id: PartId,
    name: String,
    description: Option<String>,
    min_stock_level: i64,
    stock_level: i64,
    average_price: Decimal,
    low_stock: bool,
}

impl Part {
    pub fn new(id: PartId, name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let levels = StockLevels::empty(0);
        Ok(Self {
            id,
            name,
            description: None,
            min_stock_level: 0,
            stock_level: levels.stock_level,
            average_price: levels.average_price,
            low_stock: levels.low_stock,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_min_stock_level(mut self, min_stock_level: i64) -> DomainResult<Self> {
        self.set_min_stock_level(min_stock_level)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn min_stock_level(&self) -> i64 {
        self.min_stock_level
    }

    pub fn stock_level(&self) -> i64 {
        self.stock_level
    }

    pub fn average_price(&self) -> Decimal {
        self.average_price
    }

    pub fn is_low_stock(&self) -> bool {
        self.low_stock
    }

    /// Current derived figures as a value object.
    pub fn levels(&self) -> StockLevels {
        StockLevels {
            stock_level: self.stock_level,
            average_price: self.average_price,
            low_stock: self.low_stock,
        }
    }

    pub fn rename(&mut self, name: impl Into<String>) -> DomainResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        self.name = name;
        Ok(())
    }

    /// Change the low-stock threshold. The flag follows the current stock level.
    pub fn set_min_stock_level(&mut self, min_stock_level: i64) -> DomainResult<()> {
        if min_stock_level < 0 {
            return Err(DomainError::validation("minimum stock level cannot be negative"));
        }
        self.min_stock_level = min_stock_level;
        self.low_stock = self.stock_level < min_stock_level;
        Ok(())
    }

    /// Recompute the derived stock figures from the complete ledger of this part.
    ///
    /// `entries` must contain every entry currently referencing the part, including
    /// in-flight ones. On error the part is left untouched.
    pub fn recompute_stock_levels<'a, I>(&mut self, entries: I) -> DomainResult<StockLevels>
    where
        I: IntoIterator<Item = &'a StockEntry>,
    {
        let levels = StockLevels::compute(self.id, self.min_stock_level, entries)?;
        self.stock_level = levels.stock_level;
        self.average_price = levels.average_price;
        self.low_stock = levels.low_stock;
        Ok(levels)
    }
}

impl Entity for Part {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
