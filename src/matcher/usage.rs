//! Column usage tracking
//!
//! Negotiation marks columns as consumed so no column is bound twice within
//! a branch. Checkpoints snapshot the bitset before a construction path is
//! attempted; a failed path restores the checkpoint and the next path sees
//! the original state.

use fixedbitset::FixedBitSet;

/// Bitset over schema positions consumed by the current negotiation branch.
#[derive(Debug, Clone)]
pub struct ColumnUsage {
    bits: FixedBitSet,
}

/// Saved usage state for backtracking.
#[derive(Debug, Clone)]
pub struct UsageCheckpoint {
    bits: FixedBitSet,
}

impl ColumnUsage {
    pub fn new(width: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(width),
        }
    }

    pub fn is_used(&self, position: u16) -> bool {
        self.bits.contains(position as usize)
    }

    pub fn mark(&mut self, position: u16) {
        self.bits.insert(position as usize);
    }

    pub fn used_count(&self) -> usize {
        self.bits.count_ones(..)
    }

    pub fn checkpoint(&self) -> UsageCheckpoint {
        UsageCheckpoint {
            bits: self.bits.clone(),
        }
    }

    pub fn restore(&mut self, checkpoint: &UsageCheckpoint) {
        self.bits.clone_from(&checkpoint.bits);
    }
}
