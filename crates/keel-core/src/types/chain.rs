//! Stored state of the light client: one record per retained block, the
//! producer schedule ring, and the sections that partition the stored blocks.

use crate::merkle::IncrementalMerkle;
use crate::types::header::{ProducerSchedule, SignedBlockHeader};
use crate::types::primitives::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Finality policy of the remote chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusAlgo {
    /// Finality by depth: headers are pushed in sections and a section is
    /// final once it is `lib_depth` blocks deep.
    #[default]
    Pipeline,
    /// Finality by PBFT quorum: header batches carry commit or checkpoint
    /// messages signed by a quorum of producers.
    Batch,
}

impl fmt::Display for ConsensusAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusAlgo::Pipeline => write!(f, "pipeline"),
            ConsensusAlgo::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for ConsensusAlgo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" => Ok(ConsensusAlgo::Pipeline),
            "batch" => Ok(ConsensusAlgo::Batch),
            other => Err(format!("Unknown consensus algorithm '{}'", other)),
        }
    }
}

/// Identity of the remote chain, set once by the operator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    pub chain_name: Name,
    #[serde(with = "hex_digest")]
    pub chain_id: ChainId,
    pub consensus_algo: ConsensusAlgo,
}

/// Counters that change as blocks are accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMutable {
    /// Newest block marked as an anchor; its record is never pruned.
    pub last_anchor_block_num: u32,
    /// Batch mode: block that proposed the pending schedule, or 0.
    #[serde(default)]
    pub newprod_block_num: u32,
}

/// Everything retained about one accepted block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderState {
    pub block_num: u32,
    #[serde(with = "hex_digest")]
    pub block_id: BlockId,
    pub header: SignedBlockHeader,
    pub active_schedule_id: u64,
    pub pending_schedule_id: u64,
    /// Accumulator over the ids of every block before this one.
    pub blockroot_merkle: IncrementalMerkle,
    pub block_signing_key: PublicKey,
    pub is_anchor_block: bool,
}

/// A registered producer schedule and its digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerScheduleRecord {
    pub id: u64,
    pub schedule: ProducerSchedule,
    #[serde(with = "hex_digest")]
    pub schedule_hash: Digest,
}

/// A contiguous run of stored blocks sharing one unbroken chain of custody.
///
/// `producers` and `block_nums` form the rotation window: the most recent
/// producer hand-offs, oldest first, with the block number at which each
/// producer took over.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub first: u32,
    pub last: u32,
    /// Block that proposed a still-settling producer schedule, or 0.
    pub newprod_block_num: u32,
    pub valid: bool,
    pub producers: Vec<Name>,
    pub block_nums: Vec<u32>,
}

impl Section {
    /// Number of blocks this section spans.
    pub fn span(&self) -> u32 {
        self.last - self.first + 1
    }

    pub fn contains(&self, block_num: u32) -> bool {
        (self.first..=self.last).contains(&block_num)
    }
}
