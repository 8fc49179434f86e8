//! Derived stock figures of a part and the pure function computing them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use limas_core::{DomainError, DomainResult, Entity, PartId, ValueObject};

use crate::stock_entry::StockEntry;

/// Scale used for stored average prices.
pub const AVERAGE_PRICE_SCALE: u32 = 4;

/// Stock figures derived from a part's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    /// Units on hand: sum of every ledger delta.
    pub stock_level: i64,
    /// Moving weighted average unit price of the units on hand.
    pub average_price: Decimal,
    /// `stock_level` fell below the part's minimum.
    pub low_stock: bool,
}

impl ValueObject for StockLevels {}

impl StockLevels {
    /// Figures of a part without any ledger entry.
    pub fn empty(min_stock_level: i64) -> Self {
        Self {
            stock_level: 0,
            average_price: Decimal::ZERO,
            low_stock: 0 < min_stock_level,
        }
    }

    /// Compute the figures of `part_id` from its complete ledger.
    ///
    /// Entries are replayed in ledger order `(date_time, id)`, so the result does not
    /// depend on the order of `entries`. Every entry must reference `part_id`.
    ///
    /// Valuation: additions value the units that lift stock above zero at the
    /// entry's price (or at the current average when no price was recorded);
    /// removals shrink the valued stock at the current average; the valuation
    /// restarts from zero whenever stock drops to zero or below.
    pub fn compute<'a, I>(part_id: PartId, min_stock_level: i64, entries: I) -> DomainResult<Self>
    where
        I: IntoIterator<Item = &'a StockEntry>,
    {
        let mut ledger: Vec<&StockEntry> = entries.into_iter().collect();
        for entry in &ledger {
            validate_entry(part_id, entry)?;
        }
        ledger.sort_by(|a, b| {
            a.date_time()
                .cmp(&b.date_time())
                .then_with(|| a.id().cmp(b.id()))
        });

        let mut quantity: i64 = 0;
        let mut value = Decimal::ZERO;

        for entry in ledger {
            let delta = entry.stock_level();
            let next = quantity.checked_add(delta).ok_or_else(|| {
                DomainError::invariant(format!("stock level overflow for part {part_id}"))
            })?;

            if next <= 0 {
                value = Decimal::ZERO;
            } else if delta > 0 {
                let unit_price = match entry.price() {
                    Some(price) => price,
                    None => average(part_id, value, quantity)?,
                };
                let base = if quantity > 0 { value } else { Decimal::ZERO };
                let added = unit_price
                    .checked_mul(Decimal::from(next.min(delta)))
                    .and_then(|v| base.checked_add(v))
                    .ok_or_else(|| price_overflow(part_id))?;
                value = added;
            } else if delta < 0 {
                value = average(part_id, value, quantity)?
                    .checked_mul(Decimal::from(next))
                    .ok_or_else(|| price_overflow(part_id))?;
            }

            quantity = next;
        }

        let average_price = average(part_id, value, quantity)?
            .round_dp(AVERAGE_PRICE_SCALE)
            .normalize();

        Ok(Self {
            stock_level: quantity,
            average_price,
            low_stock: quantity < min_stock_level,
        })
    }
}

fn validate_entry(part_id: PartId, entry: &StockEntry) -> DomainResult<()> {
    if entry.part() != Some(part_id) {
        return Err(DomainError::invariant(format!(
            "stock entry {} does not belong to part {part_id}",
            entry.id()
        )));
    }
    if let Some(price) = entry.price() {
        if price.is_sign_negative() && !price.is_zero() {
            return Err(DomainError::invariant(format!(
                "stock entry {} has a negative price",
                entry.id()
            )));
        }
    }
    Ok(())
}

fn average(part_id: PartId, value: Decimal, quantity: i64) -> DomainResult<Decimal> {
    if quantity <= 0 {
        return Ok(Decimal::ZERO);
    }
    value
        .checked_div(Decimal::from(quantity))
        .ok_or_else(|| price_overflow(part_id))
}

fn price_overflow(part_id: PartId) -> DomainError {
    DomainError::invariant(format!("average price overflow for part {part_id}"))
}
