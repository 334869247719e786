use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::models::{OrderingKey, Position, Side, TradeHistoryEntry};

/// Durable image of the ledger, written after every step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerSnapshot {
    pub positions: Vec<Position>,
    pub history: Vec<TradeHistoryEntry>,
}

/// What a confirmed close did to the position
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// Position fully closed and dropped from the ledger
    Removed(Position),
    /// Position still open with the updated size/margin
    Reduced(Position),
}

/// Store of open long/short positions and the trade history log
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: Vec<Position>,
    history: Vec<TradeHistoryEntry>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger and restore it from a persisted snapshot
    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let mut ledger = Self::new();
        ledger.restore(snapshot)?;
        Ok(ledger)
    }

    /// Insert a newly confirmed position
    pub fn add_position(&mut self, position: Position) -> Result<(), LedgerError> {
        if self.get(&position.order_ref).is_some() {
            return Err(LedgerError::DuplicateOrderRef(position.order_ref));
        }

        tracing::debug!(
            order_ref = %position.order_ref,
            side = %position.side,
            size = %position.size,
            "Position added to ledger"
        );

        self.positions.push(position);
        Ok(())
    }

    /// Apply a confirmed close.
    ///
    /// Reducing by the whole size removes the position; anything less shrinks
    /// size and margin in place.
    pub fn reduce_or_remove_position(
        &mut self,
        order_ref: &str,
        size_reduction: u128,
        margin_reduction: u128,
    ) -> Result<Reduction, LedgerError> {
        let index = self
            .positions
            .iter()
            .position(|p| p.order_ref == order_ref)
            .ok_or_else(|| LedgerError::UnknownOrderRef(order_ref.to_string()))?;

        let available = self.positions[index].size;
        if size_reduction > available {
            return Err(LedgerError::ReductionExceedsSize {
                order_ref: order_ref.to_string(),
                requested: size_reduction,
                available,
            });
        }

        if size_reduction == available {
            let removed = self.positions.remove(index);
            tracing::debug!(order_ref = %order_ref, "Position removed from ledger");
            return Ok(Reduction::Removed(removed));
        }

        let position = &mut self.positions[index];
        position.size -= size_reduction;
        position.margin = position.margin.saturating_sub(margin_reduction);

        tracing::debug!(
            order_ref = %order_ref,
            remaining_size = %position.size,
            remaining_margin = %position.margin,
            "Position reduced"
        );

        Ok(Reduction::Reduced(position.clone()))
    }

    /// Get position by order reference
    pub fn get(&self, order_ref: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.order_ref == order_ref)
    }

    /// Open positions of one side, ordered by `ordering`.
    ///
    /// Ties fall back to `order_ref`, in the same direction as the primary key,
    /// so the pick is deterministic.
    pub fn query_positions(&self, side: Side, ordering: OrderingKey) -> Vec<Position> {
        let mut matching: Vec<Position> = self
            .positions
            .iter()
            .filter(|p| p.side == side)
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let primary = match ordering {
                OrderingKey::StartTimeAsc => a.opened_at.cmp(&b.opened_at),
                OrderingKey::StartTimeDesc => b.opened_at.cmp(&a.opened_at),
                OrderingKey::SizeAsc => a.size.cmp(&b.size),
                OrderingKey::SizeDesc => b.size.cmp(&a.size),
            };
            let tie = match ordering {
                OrderingKey::StartTimeAsc | OrderingKey::SizeAsc => a.order_ref.cmp(&b.order_ref),
                OrderingKey::StartTimeDesc | OrderingKey::SizeDesc => b.order_ref.cmp(&a.order_ref),
            };
            primary.then(tie)
        });

        matching
    }

    /// Open positions of one side, oldest first
    pub fn open_positions(&self, side: Side) -> Vec<Position> {
        self.query_positions(side, OrderingKey::StartTimeAsc)
    }

    /// Get all open positions (both sides)
    pub fn all_positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn append_history(&mut self, entry: TradeHistoryEntry) {
        self.history.push(entry);
    }

    pub fn history(&self) -> &[TradeHistoryEntry] {
        &self.history
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            positions: self.positions.clone(),
            history: self.history.clone(),
        }
    }

    /// Replace the ledger contents with a snapshot.
    ///
    /// The snapshot is rejected as a whole if it repeats an `order_ref`.
    pub fn restore(&mut self, snapshot: LedgerSnapshot) -> Result<(), LedgerError> {
        let mut seen = HashSet::new();
        for position in &snapshot.positions {
            if !seen.insert(position.order_ref.as_str()) {
                return Err(LedgerError::DuplicateOrderRef(position.order_ref.clone()));
            }
        }

        tracing::info!(
            "Restored {} open positions and {} history entries",
            snapshot.positions.len(),
            snapshot.history.len()
        );

        self.positions = snapshot.positions;
        self.history = snapshot.history;
        Ok(())
    }
}
