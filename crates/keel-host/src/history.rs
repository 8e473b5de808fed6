//! Per-relay history of block-root accumulator snapshots.
//!
//! Relays record the accumulator at every block whose number is a multiple
//! of [`BLOCK_MERKLE_INTERVAL`] (about 30 minutes of blocks). The history
//! thins itself as it grows:
//!
//! - the last `RECENT_SPAN` blocks (about 3 days) keep every snapshot,
//! - older snapshots survive only at multiples of `KEEP_INTERVAL` (about 3 hours),
//! - snapshots more than `PAST_SPAN` blocks old (about 15 days) are dropped.

use crate::error::HostError;
use keel_core::IncrementalMerkle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const BLOCK_MERKLE_INTERVAL: u32 = 4096;
const KEEP_INTERVAL: u32 = BLOCK_MERKLE_INTERVAL * 6;
const RECENT_SPAN: u32 = BLOCK_MERKLE_INTERVAL * 24;
const PAST_SPAN: u32 = RECENT_SPAN * 5;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleHistory {
    snapshots: BTreeMap<u32, IncrementalMerkle>,
}

impl MerkleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, block_num: u32) -> Option<&IncrementalMerkle> {
        self.snapshots.get(&block_num)
    }

    pub fn block_nums(&self) -> impl Iterator<Item = u32> + '_ {
        self.snapshots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Store the accumulator at `block_num`, then thin older snapshots.
    pub fn record(&mut self, block_num: u32, merkle: IncrementalMerkle) -> Result<(), HostError> {
        if block_num % BLOCK_MERKLE_INTERVAL != 0 {
            return Err(HostError::MerkleNotAligned {
                block_num,
                interval: BLOCK_MERKLE_INTERVAL,
            });
        }
        if self.snapshots.contains_key(&block_num) {
            return Err(HostError::MerkleExists(block_num));
        }
        self.snapshots.insert(block_num, merkle);

        let Some(thin_from) = block_num.checked_sub(RECENT_SPAN).filter(|from| *from > 0) else {
            return Ok(());
        };
        let thin_to = thin_from + BLOCK_MERKLE_INTERVAL * 2;
        let thinned: Vec<u32> = self
            .snapshots
            .range(thin_from..thin_to)
            .map(|(num, _)| *num)
            .filter(|num| num % KEEP_INTERVAL != 0)
            .collect();
        for num in thinned {
            self.snapshots.remove(&num);
        }

        if let Some(cutoff) = block_num.checked_sub(PAST_SPAN) {
            let expired: Vec<u32> = self.snapshots.range(..cutoff).map(|(num, _)| *num).collect();
            if !expired.is_empty() {
                debug!(count = expired.len(), cutoff, "dropping expired block merkle snapshots");
            }
            for num in expired {
                self.snapshots.remove(&num);
            }
        }
        Ok(())
    }
}
