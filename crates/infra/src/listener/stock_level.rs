//! Stock level maintenance during flush.
//!
//! Keeps every part's derived stock figures consistent with its stock entries inside
//! the transaction that changes those entries.

use std::collections::HashSet;

use tracing::{debug, warn};

use limas_core::{Entity, PartId};
use limas_inventory::StockEntry;

use super::FlushListener;
use crate::config::StockLevelConfig;
use crate::entity::{EntityKey, EntityRef};
use crate::unit_of_work::{FlushContext, UnitOfWorkError};

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Parts whose figures were recomputed and re-registered, in first-seen order.
    pub recomputed: Vec<PartId>,
    /// Referenced parts that do not exist (or are being deleted).
    pub skipped: Vec<PartId>,
}

/// Recomputes the stock figures of every part touched by a transaction.
///
/// Affected parts are the owners of stock entries scheduled for insert or update
/// (plus the previous owner of reassigned entries and, if enabled, the owners of
/// deleted entries). Each part is recomputed once per flush no matter how many of
/// its entries changed.
#[derive(Debug, Clone, Default)]
pub struct StockLevelMaintainer {
    config: StockLevelConfig,
}

impl StockLevelMaintainer {
    pub fn new(config: StockLevelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StockLevelConfig {
        &self.config
    }

    /// Distinct parts whose figures the pending change set invalidates.
    pub fn affected_parts(&self, ctx: &dyn FlushContext) -> Vec<PartId> {
        let mut seen = HashSet::new();
        let mut parts = Vec::new();
        let mut collect = |part: Option<PartId>| {
            if let Some(id) = part {
                if seen.insert(id) {
                    parts.push(id);
                }
            }
        };

        for entity in ctx.scheduled_insertions() {
            if let EntityRef::StockEntry(entry) = entity {
                collect(entry.part());
            }
        }

        for entity in ctx.scheduled_updates() {
            if let EntityRef::StockEntry(entry) = entity {
                collect(entry.part());
                if self.config.recompute_previous_owner {
                    collect(previous_owner(ctx, entry));
                }
            }
        }

        if self.config.recompute_on_delete {
            for entity in ctx.scheduled_deletions() {
                if let EntityRef::StockEntry(entry) = entity {
                    collect(entry.part());
                    collect(previous_owner(ctx, entry));
                }
            }
        }

        parts
    }

    /// Recompute and re-register every affected part.
    pub fn maintain(&self, ctx: &mut dyn FlushContext) -> Result<FlushReport, UnitOfWorkError> {
        let mut report = FlushReport::default();

        for part_id in self.affected_parts(ctx) {
            // The part (and its version) must be loaded before the ledger is read.
            if !ctx.ensure_part_managed(part_id)? {
                warn!(part_id = %part_id, "stock entries reference a missing part; skipping stock level recomputation");
                report.skipped.push(part_id);
                continue;
            }
            let entries = ctx.stock_entries_for_part(part_id)?;
            let part = ctx
                .managed_part_mut(part_id)?
                .ok_or(UnitOfWorkError::NotManaged(EntityKey::Part(part_id)))?;
            let levels = part.recompute_stock_levels(&entries)?;
            debug!(
                part_id = %part_id,
                entries = entries.len(),
                stock_level = levels.stock_level,
                average_price = %levels.average_price,
                low_stock = levels.low_stock,
                "recomputed stock levels"
            );

            ctx.recompute_single_change_set(EntityKey::Part(part_id))?;
            report.recomputed.push(part_id);
        }

        Ok(report)
    }
}

impl FlushListener for StockLevelMaintainer {
    fn name(&self) -> &'static str {
        "stock_level"
    }

    fn on_flush(&self, ctx: &mut dyn FlushContext) -> Result<(), UnitOfWorkError> {
        let report = self.maintain(ctx)?;
        if !report.recomputed.is_empty() || !report.skipped.is_empty() {
            debug!(
                recomputed = report.recomputed.len(),
                skipped = report.skipped.len(),
                "stock level maintenance finished"
            );
        }
        Ok(())
    }
}

/// Owner recorded in the entry's load-time snapshot, when the change set shows the
/// `part` field changing.
fn previous_owner(ctx: &dyn FlushContext, entry: &StockEntry) -> Option<PartId> {
    let cs = ctx.change_set(EntityKey::StockEntry(*entry.id()))?;
    let change = cs.field("part")?;
    serde_json::from_value::<Option<PartId>>(change.old.clone())
        .ok()
        .flatten()
}
