use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use limas_core::{DomainError, DomainResult, Entity, PartId, StockEntryId, UserId};

/// Ledger entry: one recorded stock movement.
///
/// `stock_level` is a signed delta: positive values add units, negative values
/// remove them. The entry references its part by identifier only; it never owns
/// the part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    id: StockEntryId,
    part: Option<PartId>,
    stock_level: i64,
    price: Option<Decimal>,
    date_time: DateTime<Utc>,
    user: Option<UserId>,
    comment: Option<String>,
    correction: bool,
}

impl StockEntry {
    pub fn new(
        id: StockEntryId,
        part: Option<PartId>,
        stock_level: i64,
        date_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            part,
            stock_level,
            price: None,
            date_time,
            user: None,
            comment: None,
            correction: false,
        }
    }

    /// Record the unit price paid for an addition.
    pub fn with_price(mut self, price: Decimal) -> DomainResult<Self> {
        self.set_price(Some(price))?;
        Ok(self)
    }

    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn part(&self) -> Option<PartId> {
        self.part
    }

    pub fn stock_level(&self) -> i64 {
        self.stock_level
    }

    pub fn price(&self) -> Option<Decimal> {
        self.price
    }

    pub fn date_time(&self) -> DateTime<Utc> {
        self.date_time
    }

    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn is_correction(&self) -> bool {
        self.correction
    }

    pub fn is_removal(&self) -> bool {
        self.stock_level < 0
    }

    /// Correct the recorded quantity of an already persisted movement.
    ///
    /// The entry is flagged as a correction so the ledger keeps a trace of the edit.
    pub fn correct_stock_level(&mut self, stock_level: i64) {
        self.stock_level = stock_level;
        self.correction = true;
    }

    pub fn set_price(&mut self, price: Option<Decimal>) -> DomainResult<()> {
        if let Some(p) = price {
            if p.is_sign_negative() && !p.is_zero() {
                return Err(DomainError::validation("price cannot be negative"));
            }
        }
        self.price = price;
        Ok(())
    }

    /// Move the entry to another part (or detach it).
    pub fn reassign(&mut self, part: Option<PartId>) {
        self.part = part;
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }
}

impl Entity for StockEntry {
    type Id = StockEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
