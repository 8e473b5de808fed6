//! The header chain: accepts remote block headers, tracks producer schedule
//! rotations, and maintains the anchors external verifiers trust.
//!
//! Two finality policies are supported:
//!
//! - **Pipeline**: headers arrive in sections. A section is a contiguous run
//!   of headers whose first block is trusted because the previous section was
//!   final when it was opened. A section becomes final (`valid`) once it is
//!   `lib_depth` blocks deep, and its root then becomes an anchor.
//! - **Batch**: short header batches arrive together with a PBFT quorum proof
//!   for the last header, which becomes an anchor immediately.
//!
//! Every write entry point is atomic: work happens on a staged copy of the
//! state that replaces the live state only when the whole call succeeds.

use crate::config::ChainConfig;
use crate::consensus::pbft::{verify_batch_proof, QuorumTarget};
use crate::consensus::schedule::ProducerScheduleStore;
use crate::consensus::signature::{assert_producer_signature, sig_digest};
use crate::error::ChainError;
use crate::merkle::{verify_merkle_path, IncrementalMerkle};
use crate::types::chain::*;
use crate::types::header::{ProducerSchedule, SignedBlockHeader};
use crate::types::pbft::BatchProof;
use crate::types::primitives::{BlockId, Digest, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Result of one bounded pruning step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneProgress {
    /// Header records deleted by this call.
    pub removed: u32,
    /// Whether calling again would delete more.
    pub more_remaining: bool,
}

/// Schedule ids and key resolved for a header linked to its predecessor.
struct Linked {
    active_schedule_id: u64,
    pending_schedule_id: u64,
    blockroot_merkle: IncrementalMerkle,
    /// Rotation completed with this header.
    rotated: bool,
}

/// Light client state for one remote chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightClient {
    config: ChainConfig,
    global: GlobalState,
    mutable: GlobalMutable,
    chaindb: BTreeMap<u32, BlockHeaderState>,
    schedules: ProducerScheduleStore,
    /// Keyed by each section's first block number; the last entry is the tail.
    sections: BTreeMap<u32, Section>,
}

impl LightClient {
    pub fn new(config: ChainConfig, global: GlobalState) -> Result<Self, ChainError> {
        config.validate()?;
        Ok(Self {
            config,
            global,
            mutable: GlobalMutable::default(),
            chaindb: BTreeMap::new(),
            schedules: ProducerScheduleStore::new(),
            sections: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn global(&self) -> &GlobalState {
        &self.global
    }

    /// Replace the chain identity. Stored headers are kept.
    pub fn set_global(&mut self, global: GlobalState) {
        info!(chain_name = %global.chain_name, consensus_algo = %global.consensus_algo, "global state updated");
        self.global = global;
    }

    pub fn set_config(&mut self, config: ChainConfig) -> Result<(), ChainError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Whether any header, schedule or section is stored.
    pub fn is_initialized(&self) -> bool {
        !(self.chaindb.is_empty() && self.schedules.is_empty() && self.sections.is_empty())
    }

    // --- Write entry points ---

    /// Trust `header` as the starting point of the chain.
    ///
    /// `schedule` must be the producer schedule active at `header` and
    /// `blockroot_merkle` the accumulator over every block id before it. The
    /// header becomes the first anchor.
    #[instrument(skip_all, fields(block_num = header.block_num()))]
    pub fn initialize(
        &mut self,
        header: SignedBlockHeader,
        schedule: ProducerSchedule,
        blockroot_merkle: IncrementalMerkle,
    ) -> Result<(), ChainError> {
        if self.is_initialized() {
            return Err(ChainError::AlreadyInitialized);
        }
        self.staged(|next| next.init_from_trusted(header, schedule, blockroot_merkle))
    }

    /// Wipe all stored state and initialize again from `header`.
    #[instrument(skip_all, fields(block_num = header.block_num()))]
    pub fn reinitialize(
        &mut self,
        header: SignedBlockHeader,
        schedule: ProducerSchedule,
        blockroot_merkle: IncrementalMerkle,
    ) -> Result<(), ChainError> {
        self.staged(|next| {
            next.wipe();
            next.init_from_trusted(header, schedule, blockroot_merkle)
        })
    }

    /// Wipe all stored state, leaving the client uninitialized.
    pub fn force_reinitialize(&mut self) {
        warn!(chain_name = %self.global.chain_name, "forcing reinitialization, all headers dropped");
        self.wipe();
    }

    /// Submit a header batch under the pipeline policy.
    ///
    /// If the first header is not adjacent to the tail section it opens a new
    /// section, trusting `blockroot_merkle` as its accumulator; the remaining
    /// headers must link one by one.
    #[instrument(skip_all, fields(count = headers.len()))]
    pub fn push_section(
        &mut self,
        headers: Vec<SignedBlockHeader>,
        blockroot_merkle: IncrementalMerkle,
    ) -> Result<(), ChainError> {
        self.require_algo(ConsensusAlgo::Pipeline)?;
        self.staged(|next| next.push_section_staged(headers, blockroot_merkle))
    }

    /// Submit a header batch with a quorum proof for its last header under
    /// the batch policy. The last header becomes an anchor.
    #[instrument(skip_all, fields(count = headers.len(), proof_len = proof.len()))]
    pub fn push_block_commits(
        &mut self,
        headers: Vec<SignedBlockHeader>,
        blockroot_merkle: IncrementalMerkle,
        proof: BatchProof,
    ) -> Result<(), ChainError> {
        self.require_algo(ConsensusAlgo::Batch)?;
        self.staged(|next| next.push_block_commits_staged(headers, blockroot_merkle, proof))
    }

    /// Delete the oldest section, at most `max_delete_per_call` records per
    /// call. Call repeatedly until `more_remaining` is false.
    #[instrument(skip_all)]
    pub fn remove_first_section(&mut self) -> Result<PruneProgress, ChainError> {
        self.staged(|next| next.remove_first_section_staged())
    }

    /// Drop the tail section if it never became final.
    #[instrument(skip_all)]
    pub fn remove_invalid_last_section(&mut self) -> Result<(), ChainError> {
        let tail = self.tail_section()?;
        if tail.valid {
            return Err(ChainError::CannotRemoveSection {
                reason: "last section is valid",
            });
        }
        if self.sections.len() < 2 {
            return Err(ChainError::CannotRemoveSection {
                reason: "last section is the only section",
            });
        }
        let first = tail.first;
        self.remove_section(first);
        Ok(())
    }

    // --- Queries ---

    pub fn block_state(&self, block_num: u32) -> Option<&BlockHeaderState> {
        self.chaindb.get(&block_num)
    }

    pub fn block_states(&self) -> impl Iterator<Item = &BlockHeaderState> + '_ {
        self.chaindb.values()
    }

    pub fn head_block_num(&self) -> Option<u32> {
        self.chaindb.keys().next_back().copied()
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> + '_ {
        self.sections.values()
    }

    pub fn last_section(&self) -> Option<&Section> {
        self.sections.values().next_back()
    }

    pub fn schedules(&self) -> &ProducerScheduleStore {
        &self.schedules
    }

    pub fn last_anchor_block_num(&self) -> u32 {
        self.mutable.last_anchor_block_num
    }

    /// Fail unless `block_num` is an anchor whose accumulator holds `digest`
    /// at `layer`.
    pub fn assert_anchor_block_and_merkle_node(
        &self,
        block_num: u32,
        layer: u32,
        digest: &Digest,
    ) -> Result<(), ChainError> {
        let state = self.anchor_state(block_num)?;
        let node = state.blockroot_merkle.require_node_by_layer(layer)?;
        if &node != digest {
            return Err(ChainError::MerkleNodeMismatch { block_num, layer });
        }
        Ok(())
    }

    /// Fail unless `block_num` is an anchor whose transaction root is
    /// `transaction_mroot`.
    pub fn assert_anchor_block_and_transaction_mroot(
        &self,
        block_num: u32,
        transaction_mroot: &Digest,
    ) -> Result<(), ChainError> {
        let state = self.anchor_state(block_num)?;
        if &state.header.header.transaction_mroot != transaction_mroot {
            return Err(ChainError::TransactionRootMismatch { block_num });
        }
        Ok(())
    }

    /// Verify that `leaf` (a receipt digest) is included in anchor block
    /// `block_num` through `path`.
    pub fn verify_transaction_inclusion(
        &self,
        block_num: u32,
        path: &[Digest],
        leaf: &Digest,
    ) -> Result<(), ChainError> {
        let root = verify_merkle_path(path, leaf)?;
        self.assert_anchor_block_and_transaction_mroot(block_num, &root)
    }

    // --- Staging ---

    /// Run `f` on a copy of the state; keep the copy only if `f` succeeds.
    fn staged<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ChainError>) -> Result<T, ChainError> {
        let mut next = self.clone();
        let out = f(&mut next)?;
        *self = next;
        Ok(out)
    }

    fn require_algo(&self, expected: ConsensusAlgo) -> Result<(), ChainError> {
        if self.global.consensus_algo != expected {
            return Err(ChainError::WrongConsensusAlgo {
                expected,
                actual: self.global.consensus_algo,
            });
        }
        Ok(())
    }

    fn wipe(&mut self) {
        self.chaindb.clear();
        self.schedules.clear();
        self.sections.clear();
        self.mutable = GlobalMutable::default();
    }

    // --- Initialization ---

    fn init_from_trusted(
        &mut self,
        header: SignedBlockHeader,
        schedule: ProducerSchedule,
        blockroot_merkle: IncrementalMerkle,
    ) -> Result<(), ChainError> {
        let block_num = header.block_num();
        if header.header.schedule_version != schedule.version {
            return Err(ChainError::ScheduleVersionMismatch {
                block_num,
                expected: schedule.version,
                got: header.header.schedule_version,
            });
        }

        let schedule_id = self.schedules.register(
            schedule,
            self.config.schedule_hash_mode,
            self.config.prodsches_max_records,
        );
        let block_signing_key = self.schedules.resolve_key(schedule_id, header.header.producer)?;
        self.verify_header_signature(&header, &blockroot_merkle, schedule_id, &block_signing_key)?;

        let producer = header.header.producer;
        let slot = header.header.timestamp.slot;
        self.chaindb.insert(
            block_num,
            BlockHeaderState {
                block_num,
                block_id: header.id(),
                header,
                active_schedule_id: schedule_id,
                pending_schedule_id: schedule_id,
                blockroot_merkle,
                block_signing_key,
                is_anchor_block: false,
            },
        );

        if self.global.consensus_algo == ConsensusAlgo::Pipeline {
            let mut section = Section::new(block_num, true);
            section.add(producer, block_num, slot, self.schedules.schedule(schedule_id)?, &self.config)?;
            self.sections.insert(block_num, section);
        }
        self.mark_anchor(block_num)?;

        info!(block_num, schedule_id, "light client initialized");
        Ok(())
    }

    // --- Pipeline policy ---

    fn push_section_staged(
        &mut self,
        headers: Vec<SignedBlockHeader>,
        blockroot_merkle: IncrementalMerkle,
    ) -> Result<(), ChainError> {
        let first_num = headers.first().ok_or(ChainError::EmptyBatch)?.block_num();
        let tail = self.tail_section()?;

        let mut headers = headers.into_iter();
        if first_num > tail.last + 1 {
            if !tail.valid && self.sections.len() > 1 {
                let stale = tail.first;
                info!(section_first = stale, "dropping unfinished tail section before opening a new one");
                self.remove_section(stale);
            }
            if let Some(root) = headers.next() {
                self.new_section(root, blockroot_merkle)?;
            }
        }

        for header in headers {
            self.append_header(header)?;
        }

        let tail = self.tail_section()?;
        info!(
            section_first = tail.first,
            section_last = tail.last,
            valid = tail.valid,
            "section updated"
        );
        Ok(())
    }

    /// Open a new section rooted at `header`, which is trusted to carry
    /// `blockroot_merkle`.
    fn new_section(&mut self, header: SignedBlockHeader, blockroot_merkle: IncrementalMerkle) -> Result<(), ChainError> {
        let block_num = header.block_num();
        if header.header.new_producers.is_some() {
            return Err(ChainError::SectionRootHasNewProducers { block_num });
        }

        self.evict_oldest_section_if_full();

        let tail = self.tail_section()?;
        if !tail.valid {
            return Err(ChainError::SectionNotValid { first: tail.first });
        }
        if block_num <= tail.last + 1 {
            return Err(ChainError::SectionGapRequired {
                block_num,
                section_last: tail.last,
            });
        }

        let active_schedule_id = self.state(tail.last)?.active_schedule_id;
        let schedule = self.schedules.schedule(active_schedule_id)?;
        if header.header.schedule_version != schedule.version {
            return Err(ChainError::ScheduleVersionMismatch {
                block_num,
                expected: schedule.version,
                got: header.header.schedule_version,
            });
        }

        let block_signing_key = self.schedules.resolve_key(active_schedule_id, header.header.producer)?;
        self.verify_header_signature(&header, &blockroot_merkle, active_schedule_id, &block_signing_key)?;

        let mut section = Section::new(block_num, false);
        section.add(
            header.header.producer,
            block_num,
            header.header.timestamp.slot,
            self.schedules.schedule(active_schedule_id)?,
            &self.config,
        )?;

        self.chaindb.insert(
            block_num,
            BlockHeaderState {
                block_num,
                block_id: header.id(),
                header,
                active_schedule_id,
                pending_schedule_id: active_schedule_id,
                blockroot_merkle,
                block_signing_key,
                is_anchor_block: false,
            },
        );
        self.sections.insert(block_num, section);

        info!(block_num, schedule_id = active_schedule_id, "new section opened");
        Ok(())
    }

    /// Append `header` to the tail section, rewriting the section's tail
    /// first if `header` forks from a block already stored.
    fn append_header(&mut self, header: SignedBlockHeader) -> Result<(), ChainError> {
        let block_num = header.block_num();
        let block_id = header.id();
        let tail = self.tail_section()?.clone();

        if block_num <= tail.first {
            return Err(ChainError::HeaderBeforeSectionRoot {
                block_num,
                section_first: tail.first,
            });
        }
        if block_num > tail.last + 1 {
            return Err(ChainError::UnlinkableBlock {
                block_num,
                section_last: tail.last,
            });
        }

        if block_num <= tail.last {
            self.rewind_tail(block_num, &block_id)?;
        }

        let prev = self.state(block_num - 1)?.clone();
        if prev.block_id != header.header.previous {
            return Err(ChainError::PreviousMismatch {
                block_num,
                expected: hex::encode(prev.block_id),
                got: hex::encode(header.header.previous),
            });
        }

        let tail = self.tail_section()?.clone();
        let mut valid = tail.valid;
        let mut newprod_block_num = tail.newprod_block_num;

        if prev.active_schedule_id == prev.pending_schedule_id {
            let deep_enough = if newprod_block_num != 0 {
                block_num.saturating_sub(newprod_block_num) >= 2 * self.config.lib_depth
            } else {
                block_num - tail.first >= self.config.lib_depth
            };
            if deep_enough {
                valid = true;
            }
        } else {
            self.require_rotation_gap(&header, &prev, newprod_block_num)?;
        }

        let linked = self.link_schedules(&header, &prev)?;
        if header.header.new_producers.is_some() {
            valid = false;
            newprod_block_num = block_num;
        }

        let block_signing_key = self.signing_key_for(&header, &prev, linked.active_schedule_id)?;
        self.verify_header_signature(
            &header,
            &linked.blockroot_merkle,
            linked.pending_schedule_id,
            &block_signing_key,
        )?;

        let producer = header.header.producer;
        let slot = header.header.timestamp.slot;
        self.chaindb.insert(
            block_num,
            BlockHeaderState {
                block_num,
                block_id,
                header,
                active_schedule_id: linked.active_schedule_id,
                pending_schedule_id: linked.pending_schedule_id,
                blockroot_merkle: linked.blockroot_merkle,
                block_signing_key,
                is_anchor_block: false,
            },
        );

        let active_schedule = self.schedules.schedule(linked.active_schedule_id)?;
        let section = self
            .sections
            .get_mut(&tail.first)
            .ok_or(ChainError::NotInitialized)?;
        section.last = block_num;
        section.valid = valid;
        section.newprod_block_num = newprod_block_num;
        if linked.rotated {
            section.reset_window();
        }
        section.add(producer, block_num, slot, active_schedule, &self.config)?;

        if valid && !tail.valid {
            info!(section_first = tail.first, block_num, "section became valid");
            self.mark_anchor(tail.first)?;
        }
        debug!(block_num, "block added");

        self.trim_tail_if_needed()
    }

    /// Discard the stored tail from `block_num` on so a competing header can
    /// take its place.
    fn rewind_tail(&mut self, block_num: u32, block_id: &BlockId) -> Result<(), ChainError> {
        if &self.state(block_num)?.block_id == block_id {
            return Err(ChainError::BlockRepeated { block_num });
        }

        let lib_depth = self.config.lib_depth;
        let tail = self.tail_section_mut()?;
        let last = tail.last;
        if block_num - tail.first < lib_depth {
            tail.valid = false;
        }
        tail.clear_from(block_num)?;
        tail.last = block_num - 1;
        if tail.newprod_block_num >= block_num {
            tail.newprod_block_num = 0;
        }

        let stale: Vec<u32> = self.chaindb.range(block_num..=last).map(|(num, _)| *num).collect();
        for num in stale {
            self.delete_record(num);
        }
        warn!(from = last, back_to = block_num, "fork detected, section tail rewound");
        Ok(())
    }

    /// Remove the oldest section when the section cap is reached.
    fn evict_oldest_section_if_full(&mut self) {
        if self.sections.len() >= self.config.sections_max_records && self.sections.len() > 1 {
            if let Some(&first) = self.sections.keys().next() {
                info!(section_first = first, "section cap reached, evicting oldest section");
                self.remove_section(first);
            }
        }
    }

    /// Shorten an over-long tail section from the front.
    fn trim_tail_if_needed(&mut self) -> Result<(), ChainError> {
        let tail = self.tail_section()?.clone();
        if tail.last - tail.first <= self.config.section_max_length {
            return Ok(());
        }

        let new_first = tail.first + self.config.trim_length;
        if tail.valid {
            // The new root is far below the tip, so it is as final as the old one.
            self.mark_anchor(new_first)?;
        }
        for num in tail.first..new_first {
            self.delete_record(num);
        }

        self.sections.remove(&tail.first);
        let mut trimmed = tail;
        trimmed.first = new_first;
        self.sections.insert(new_first, trimmed);
        debug!(section_first = new_first, "tail section trimmed");
        Ok(())
    }

    fn remove_first_section_staged(&mut self) -> Result<PruneProgress, ChainError> {
        if self.sections.len() < 2 {
            return Err(ChainError::CannotRemoveSection {
                reason: "at least two sections are required",
            });
        }
        let mut iter = self.sections.values();
        let first = iter.next().cloned().ok_or(ChainError::NotInitialized)?;
        let next_valid = iter.next().map(|s| s.valid).unwrap_or(false);
        if !next_valid {
            return Err(ChainError::CannotRemoveSection {
                reason: "next section must be valid",
            });
        }

        let budget = self.config.max_delete_per_call;
        let mut removed = 0u32;

        if first.span() > budget {
            let new_first = first.first + budget;
            for num in first.first..new_first {
                if self.delete_record(num) {
                    removed += 1;
                }
            }
            self.sections.remove(&first.first);
            let mut shortened = first;
            shortened.first = new_first;
            self.sections.insert(new_first, shortened);
            info!(removed, section_first = new_first, "first section shortened");
            return Ok(PruneProgress {
                removed,
                more_remaining: true,
            });
        }

        for num in first.first..=first.last {
            if self.delete_record(num) {
                removed += 1;
            }
        }
        self.sections.remove(&first.first);

        // Sweep records left below the new first section by earlier trims.
        let floor = self.tail_floor();
        let anchor = self.mutable.last_anchor_block_num;
        let strays: Vec<u32> = self
            .chaindb
            .range(..floor)
            .map(|(num, _)| *num)
            .filter(|num| *num != anchor)
            .take(budget.saturating_sub(removed) as usize)
            .collect();
        for num in strays {
            if self.delete_record(num) {
                removed += 1;
            }
        }

        let more_remaining = self.chaindb.range(..floor).any(|(num, _)| *num != anchor);
        info!(removed, more_remaining, "first section removed");
        Ok(PruneProgress {
            removed,
            more_remaining,
        })
    }

    /// First block of the oldest remaining section.
    fn tail_floor(&self) -> u32 {
        self.sections.keys().next().copied().unwrap_or(0)
    }

    fn remove_section(&mut self, first: u32) {
        if let Some(section) = self.sections.remove(&first) {
            for num in section.first..=section.last {
                self.delete_record(num);
            }
            debug!(section_first = section.first, section_last = section.last, "section removed");
        }
    }

    // --- Batch policy ---

    fn push_block_commits_staged(
        &mut self,
        headers: Vec<SignedBlockHeader>,
        blockroot_merkle: IncrementalMerkle,
        proof: BatchProof,
    ) -> Result<(), ChainError> {
        if headers.is_empty() {
            return Err(ChainError::EmptyBatch);
        }
        if self.chaindb.is_empty() {
            return Err(ChainError::NotInitialized);
        }

        let mut fresh = Some(blockroot_merkle);
        let mut last = None;
        for header in headers {
            let block_num = header.block_num();
            self.push_header(header, fresh.take())?;
            last = Some(block_num);
        }
        let head = last.ok_or(ChainError::EmptyBatch)?;

        let state = self.state(head)?;
        let schedule = self.schedules.schedule(state.active_schedule_id)?;
        let target = QuorumTarget {
            block_num: head,
            block_id: &state.block_id,
            chain_id: &self.global.chain_id,
            schedule,
        };
        let signers = verify_batch_proof(&proof, &target, self.config.pbft_quorum)?;
        self.mark_anchor(head)?;
        info!(block_num = head, signers, "batch finalized by quorum proof");

        self.prune_history(head);
        Ok(())
    }

    /// Store one batch-mode header. Every stored header is at or below the
    /// last anchor, so nothing stored is ever rewritten. A header whose
    /// predecessor is stored must link to it; one whose predecessor is
    /// missing starts a fresh run from `fresh_merkle`, which only the first
    /// header of a batch may carry.
    fn push_header(&mut self, header: SignedBlockHeader, fresh_merkle: Option<IncrementalMerkle>) -> Result<(), ChainError> {
        let block_num = header.block_num();
        let block_id = header.id();

        let last_anchor = self.mutable.last_anchor_block_num;
        if block_num <= last_anchor {
            return Err(ChainError::FinalizedBlockRewrite { block_num, last_anchor });
        }

        let prev = self.chaindb.get(&block_num.wrapping_sub(1)).cloned();
        if let Some(prev) = &prev {
            if prev.block_id != header.header.previous {
                return Err(ChainError::PreviousMismatch {
                    block_num,
                    expected: hex::encode(prev.block_id),
                    got: hex::encode(header.header.previous),
                });
            }
        }

        let (active_schedule_id, pending_schedule_id, blockroot_merkle, block_signing_key) = match prev {
            Some(prev) => {
                if prev.active_schedule_id != prev.pending_schedule_id {
                    self.require_rotation_gap(&header, &prev, self.mutable.newprod_block_num)?;
                }
                let linked = self.link_schedules(&header, &prev)?;
                if header.header.new_producers.is_some() {
                    self.mutable.newprod_block_num = block_num;
                } else if linked.rotated {
                    self.mutable.newprod_block_num = 0;
                }
                let key = self.signing_key_for(&header, &prev, linked.active_schedule_id)?;
                (linked.active_schedule_id, linked.pending_schedule_id, linked.blockroot_merkle, key)
            }
            None => {
                let Some(merkle) = fresh_merkle else {
                    return Err(ChainError::PreviousMismatch {
                        block_num,
                        expected: String::new(),
                        got: hex::encode(header.header.previous),
                    });
                };
                if header.header.new_producers.is_some() {
                    return Err(ChainError::SectionRootHasNewProducers { block_num });
                }
                let head = self.chaindb.values().next_back().ok_or(ChainError::NotInitialized)?;
                let active_schedule_id = head.active_schedule_id;
                let schedule = self.schedules.schedule(active_schedule_id)?;
                if header.header.schedule_version != schedule.version {
                    return Err(ChainError::ScheduleVersionMismatch {
                        block_num,
                        expected: schedule.version,
                        got: header.header.schedule_version,
                    });
                }
                let key = self.schedules.resolve_key(active_schedule_id, header.header.producer)?;
                self.mutable.newprod_block_num = 0;
                debug!(block_num, "batch starts a fresh run from the supplied accumulator");
                (active_schedule_id, active_schedule_id, merkle, key)
            }
        };

        self.verify_header_signature(&header, &blockroot_merkle, pending_schedule_id, &block_signing_key)?;
        self.chaindb.insert(
            block_num,
            BlockHeaderState {
                block_num,
                block_id,
                header,
                active_schedule_id,
                pending_schedule_id,
                blockroot_merkle,
                block_signing_key,
                is_anchor_block: false,
            },
        );
        debug!(block_num, "block added");
        Ok(())
    }

    /// Delete records more than `chaindb_max_history_blocks` behind `head`.
    fn prune_history(&mut self, head: u32) {
        let Some(cutoff) = head.checked_sub(self.config.chaindb_max_history_blocks) else {
            return;
        };
        let anchor = self.mutable.last_anchor_block_num;
        let stale: Vec<u32> = self
            .chaindb
            .range(..cutoff)
            .map(|(num, _)| *num)
            .filter(|num| *num != anchor)
            .take(self.config.max_delete_per_call as usize)
            .collect();
        if !stale.is_empty() {
            debug!(count = stale.len(), cutoff, "pruning old header records");
        }
        for num in stale {
            self.delete_record(num);
        }
    }

    // --- Shared header processing ---

    /// Carry schedule ids and the accumulator forward from `prev` to
    /// `header`, registering a proposed schedule if `header` carries one.
    fn link_schedules(&mut self, header: &SignedBlockHeader, prev: &BlockHeaderState) -> Result<Linked, ChainError> {
        let block_num = header.block_num();
        let mut blockroot_merkle = prev.blockroot_merkle.clone();
        blockroot_merkle.append(prev.block_id);

        let mut active_schedule_id = prev.active_schedule_id;
        let pending_schedule_id = prev.pending_schedule_id;
        let mut rotated = false;

        if prev.active_schedule_id != prev.pending_schedule_id
            && header.header.schedule_version == self.schedules.schedule(pending_schedule_id)?.version
        {
            active_schedule_id = pending_schedule_id;
            rotated = true;
            info!(block_num, schedule_id = active_schedule_id, "producer schedule rotation completed");
        } else {
            let active_version = self.schedules.schedule(active_schedule_id)?.version;
            if header.header.schedule_version != active_version {
                return Err(ChainError::ScheduleVersionMismatch {
                    block_num,
                    expected: active_version,
                    got: header.header.schedule_version,
                });
            }
        }

        let mut linked = Linked {
            active_schedule_id,
            pending_schedule_id,
            blockroot_merkle,
            rotated,
        };

        if let Some(new_producers) = &header.header.new_producers {
            if linked.active_schedule_id != linked.pending_schedule_id {
                return Err(ChainError::RotationAlreadyPending { block_num });
            }
            let expected = header.header.schedule_version + 1;
            if new_producers.version != expected {
                return Err(ChainError::NewProducersVersion {
                    block_num,
                    expected,
                    got: new_producers.version,
                });
            }
            linked.pending_schedule_id = self.schedules.register(
                new_producers.clone(),
                self.config.schedule_hash_mode,
                self.config.prodsches_max_records,
            );
            info!(
                block_num,
                version = new_producers.version,
                schedule_id = linked.pending_schedule_id,
                "new producer schedule proposed"
            );
        }
        Ok(linked)
    }

    /// Fail if `header` declares the pending schedule too soon after the
    /// block that proposed it. Test chains and chains leaving a
    /// single-producer schedule are exempt.
    fn require_rotation_gap(
        &self,
        header: &SignedBlockHeader,
        prev: &BlockHeaderState,
        newprod_block_num: u32,
    ) -> Result<(), ChainError> {
        let block_num = header.block_num();
        let pending_version = self.schedules.schedule(prev.pending_schedule_id)?.version;
        let old_active_single = self.schedules.schedule(prev.active_schedule_id)?.is_single_producer_test();
        if header.header.schedule_version == pending_version
            && !(self.config.few_producers_test || old_active_single)
            && block_num.saturating_sub(newprod_block_num) <= self.config.min_rotation_gap
        {
            return Err(ChainError::RotationTooFast {
                block_num,
                newprod_block_num,
                min_gap: self.config.min_rotation_gap,
            });
        }
        Ok(())
    }

    /// Reuse the predecessor's key when the producer and schedule are unchanged.
    fn signing_key_for(
        &self,
        header: &SignedBlockHeader,
        prev: &BlockHeaderState,
        active_schedule_id: u64,
    ) -> Result<PublicKey, ChainError> {
        if header.header.producer == prev.header.header.producer && active_schedule_id == prev.active_schedule_id {
            return Ok(prev.block_signing_key);
        }
        self.schedules.resolve_key(active_schedule_id, header.header.producer)
    }

    fn verify_header_signature(
        &self,
        header: &SignedBlockHeader,
        blockroot_merkle: &IncrementalMerkle,
        pending_schedule_id: u64,
        key: &PublicKey,
    ) -> Result<(), ChainError> {
        let pending_hash = self.schedules.get(pending_schedule_id)?.schedule_hash;
        let digest = sig_digest(&header.header.digest(), &blockroot_merkle.root(), &pending_hash);
        assert_producer_signature(&digest, &header.producer_signature, key)
    }

    fn mark_anchor(&mut self, block_num: u32) -> Result<(), ChainError> {
        let state = self
            .chaindb
            .get_mut(&block_num)
            .ok_or(ChainError::BlockNotFound { block_num })?;
        state.is_anchor_block = true;
        if block_num > self.mutable.last_anchor_block_num {
            self.mutable.last_anchor_block_num = block_num;
        }
        debug!(block_num, "anchor block marked");
        Ok(())
    }

    /// Delete one header record. The newest anchor is never deleted.
    fn delete_record(&mut self, block_num: u32) -> bool {
        if block_num == self.mutable.last_anchor_block_num {
            return false;
        }
        self.chaindb.remove(&block_num).is_some()
    }

    fn state(&self, block_num: u32) -> Result<&BlockHeaderState, ChainError> {
        self.chaindb
            .get(&block_num)
            .ok_or(ChainError::BlockNotFound { block_num })
    }

    fn anchor_state(&self, block_num: u32) -> Result<&BlockHeaderState, ChainError> {
        let state = self.state(block_num)?;
        if !state.is_anchor_block {
            return Err(ChainError::NotAnchorBlock { block_num });
        }
        Ok(state)
    }

    fn tail_section(&self) -> Result<&Section, ChainError> {
        self.sections.values().next_back().ok_or(ChainError::NotInitialized)
    }

    fn tail_section_mut(&mut self) -> Result<&mut Section, ChainError> {
        self.sections.values_mut().next_back().ok_or(ChainError::NotInitialized)
    }
}
