//! Deterministic remote-chain simulation for tests.
//!
//! Producers get secp256k1 keys derived from fixed seeds, and
//! [`ChainBuilder`] produces correctly linked, correctly signed headers in
//! round-robin order, including producer schedule rotations. Signatures are
//! real, so everything a builder emits passes the same verification a relay's
//! data would.

use crate::config::ScheduleHashMode;
use crate::consensus::block_id::id_from_digest;
use crate::consensus::schedule::schedule_hash;
use crate::consensus::section::scheduled_producer;
use crate::consensus::signature::sig_digest;
use crate::merkle::IncrementalMerkle;
use crate::types::header::*;
use crate::types::pbft::{PbftCheckpoint, PbftCommit};
use crate::types::primitives::*;
use secp256k1::{Message, Secp256k1, SecretKey};
use sha2::{Digest as _, Sha256};

/// A producer with a deterministic signing key.
#[derive(Clone, Debug)]
pub struct TestProducer {
    pub name: Name,
    secret: SecretKey,
}

impl TestProducer {
    /// `seed` must be non-zero; the same seed always yields the same key.
    pub fn new(name: &str, seed: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[24..].copy_from_slice(&seed.to_be_bytes());
        Self {
            name: name.parse().expect("valid test producer name"),
            secret: SecretKey::from_slice(&bytes).expect("valid secret key"),
        }
    }

    /// `count` producers named `producera`, `producerb`, … with seeds 1, 2, …
    pub fn roster(count: usize) -> Vec<TestProducer> {
        assert!(count <= 26, "at most 26 test producers");
        (0..count)
            .map(|i| TestProducer::new(&format!("producer{}", (b'a' + i as u8) as char), i as u64 + 1))
            .collect()
    }

    /// The sole producer of a single-node test chain.
    pub fn single() -> TestProducer {
        TestProducer::new("eosio", 0xE05)
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        PublicKey(secp256k1::PublicKey::from_secret_key(&secp, &self.secret).serialize())
    }

    pub fn producer_key(&self) -> ProducerKey {
        ProducerKey {
            producer_name: self.name,
            block_signing_key: self.public_key(),
        }
    }

    /// Compact recoverable signature with the compressed-key header byte.
    pub fn sign(&self, digest: &Digest) -> Signature {
        let secp = Secp256k1::signing_only();
        let signature = secp.sign_ecdsa_recoverable(&Message::from_digest(*digest), &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();
        let mut out = [0u8; 65];
        out[0] = 27 + 4 + recovery_id.to_i32() as u8;
        out[1..].copy_from_slice(&compact);
        Signature(out)
    }
}

/// Schedule listing `producers` in order.
pub fn schedule_of(version: u32, producers: &[TestProducer]) -> ProducerSchedule {
    ProducerSchedule {
        version,
        producers: producers.iter().map(TestProducer::producer_key).collect(),
    }
}

/// Signed commits for `block_id` from each producer, all in `view`.
pub fn commits_for(
    producers: &[TestProducer],
    block_num: u32,
    block_id: BlockId,
    chain_id: ChainId,
    view: u32,
) -> Vec<PbftCommit> {
    producers
        .iter()
        .enumerate()
        .map(|(i, producer)| {
            let mut commit = PbftCommit {
                uuid: format!("commit-{}-{}", block_num, i),
                view,
                block_num,
                block_id,
                pub_key: producer.public_key(),
                chain_id,
                producer_signature: Signature::default(),
                timestamp: 1_600_000_000_000_000 + i as u64,
            };
            commit.producer_signature = producer.sign(&commit.digest());
            commit
        })
        .collect()
}

/// Signed checkpoints for `block_id` from each producer.
pub fn checkpoints_for(
    producers: &[TestProducer],
    block_num: u32,
    block_id: BlockId,
    chain_id: ChainId,
) -> Vec<PbftCheckpoint> {
    producers
        .iter()
        .enumerate()
        .map(|(i, producer)| {
            let mut checkpoint = PbftCheckpoint {
                uuid: format!("checkpoint-{}-{}", block_num, i),
                block_num,
                block_id,
                pub_key: producer.public_key(),
                chain_id,
                producer_signature: Signature::default(),
                timestamp: 1_600_000_000_000_000 + i as u64,
            };
            checkpoint.producer_signature = producer.sign(&checkpoint.digest());
            checkpoint
        })
        .collect()
}

/// Produces a remote chain, one signed header at a time.
///
/// The builder keeps the accumulator over every id produced so far, so the
/// accumulator it hands out for a block is exactly what the light client
/// derives for that block.
#[derive(Clone, Debug)]
pub struct ChainBuilder {
    producers: Vec<TestProducer>,
    active: ProducerSchedule,
    /// Proposed schedule and the block that proposed it.
    pending: Option<(ProducerSchedule, u32)>,
    rotation_delay: u32,
    hash_mode: ScheduleHashMode,
    repetitions: u32,
    /// Accumulator for the next block: covers every id up to `last_id`.
    merkle: IncrementalMerkle,
    last_merkle: IncrementalMerkle,
    last_id: BlockId,
    next_slot: u32,
}

impl ChainBuilder {
    /// A chain whose next block is `start_block_num`, produced by
    /// `producers` under schedule version 1.
    pub fn new(producers: Vec<TestProducer>, start_block_num: u32) -> Self {
        let active = schedule_of(1, &producers);
        Self::with_schedule(producers, active, start_block_num)
    }

    /// A single-node chain produced by `eosio`.
    pub fn single_producer(start_block_num: u32) -> Self {
        Self::new(vec![TestProducer::single()], start_block_num)
    }

    /// `producers` must include every producer `active` names.
    pub fn with_schedule(producers: Vec<TestProducer>, active: ProducerSchedule, start_block_num: u32) -> Self {
        assert!(start_block_num > 1, "chain must start after block 1");
        let repetitions = 12;

        // Synthetic history so the first produced block has a realistic accumulator.
        let mut merkle = IncrementalMerkle::new();
        let mut last_id = [0u8; 32];
        for num in 1..start_block_num {
            let digest: Digest = Sha256::digest(num.to_le_bytes()).into();
            last_id = id_from_digest(digest, num);
            merkle.append(last_id);
        }

        // Start on the first slot of the first producer's turn.
        let rounds = 1_000;
        let next_slot = rounds * active.producers.len() as u32 * repetitions;
        Self {
            producers,
            active,
            pending: None,
            rotation_delay: 325,
            hash_mode: ScheduleHashMode::Legacy,
            repetitions,
            last_merkle: merkle.clone(),
            merkle,
            last_id,
            next_slot,
        }
    }

    /// Blocks between a schedule proposal and the first block produced under it.
    pub fn rotation_delay(mut self, delay: u32) -> Self {
        self.rotation_delay = delay;
        self
    }

    pub fn hash_mode(mut self, mode: ScheduleHashMode) -> Self {
        self.hash_mode = mode;
        self
    }

    /// Make additional producers available for signing (future schedules).
    pub fn add_producers(&mut self, producers: impl IntoIterator<Item = TestProducer>) {
        self.producers.extend(producers);
    }

    pub fn next_block_num(&self) -> u32 {
        crate::consensus::block_id::num_from_id(&self.last_id) + 1
    }

    pub fn last_id(&self) -> BlockId {
        self.last_id
    }

    pub fn active_schedule(&self) -> &ProducerSchedule {
        &self.active
    }

    /// Accumulator of the most recently produced block.
    pub fn last_merkle(&self) -> &IncrementalMerkle {
        &self.last_merkle
    }

    /// Accumulator the next produced block will carry.
    pub fn current_merkle(&self) -> &IncrementalMerkle {
        &self.merkle
    }

    pub fn producer(&self, name: Name) -> Option<&TestProducer> {
        self.producers.iter().find(|p| p.name == name)
    }

    pub fn producers(&self) -> &[TestProducer] {
        &self.producers
    }

    /// First slot of the next turn of the producer at `index` in the active
    /// schedule, counted from the next slot.
    pub fn next_turn_slot(&self, index: usize) -> u32 {
        let round = self.active.producers.len() as u32 * self.repetitions;
        let base = self.next_slot - self.next_slot % round + index as u32 * self.repetitions;
        if base >= self.next_slot {
            base
        } else {
            base + round
        }
    }

    pub fn produce(&mut self) -> SignedBlockHeader {
        self.produce_with(|_| {})
    }

    pub fn produce_n(&mut self, count: usize) -> Vec<SignedBlockHeader> {
        (0..count).map(|_| self.produce()).collect()
    }

    /// Produce and discard `count` blocks.
    pub fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.produce();
        }
    }

    /// Produce the next block proposing `schedule` (its version is set to
    /// the active version + 1).
    pub fn produce_with_new_producers(&mut self, mut schedule: ProducerSchedule) -> SignedBlockHeader {
        schedule.version = self.active.version + 1;
        self.produce_with(move |header| header.new_producers = Some(schedule))
    }

    /// Produce the next block, letting `edit` change the header before it is
    /// signed. The signer is whoever `header.producer` names after the edit.
    pub fn produce_with(&mut self, edit: impl FnOnce(&mut BlockHeader)) -> SignedBlockHeader {
        let block_num = self.next_block_num();
        let slot = self.next_slot;
        self.next_slot += 1;

        if let Some((schedule, proposed_at)) = &self.pending {
            if block_num - proposed_at >= self.rotation_delay {
                self.active = schedule.clone();
                self.pending = None;
            }
        }

        let producer = scheduled_producer(slot, &self.active, self.repetitions).expect("non-empty active schedule");
        let mut header = BlockHeader {
            timestamp: BlockTimestamp::from_slot(slot),
            producer,
            confirmed: 0,
            previous: self.last_id,
            transaction_mroot: [0u8; 32],
            action_mroot: Sha256::digest(block_num.to_be_bytes()).into(),
            schedule_version: self.active.version,
            new_producers: None,
            header_extensions: Vec::new(),
        };
        edit(&mut header);

        if let Some(schedule) = &header.new_producers {
            self.pending = Some((schedule.clone(), block_num));
        }
        let signing_schedule = self.pending.as_ref().map_or(&self.active, |(schedule, _)| schedule);
        let pending_hash = schedule_hash(signing_schedule, self.hash_mode);

        let digest = sig_digest(&header.digest(), &self.merkle.root(), &pending_hash);
        let signer = self.producer(header.producer).expect("header producer is a known test producer");
        let signed = SignedBlockHeader {
            producer_signature: signer.sign(&digest),
            header,
        };

        let id = signed.id();
        self.last_merkle = self.merkle.clone();
        self.merkle.append(id);
        self.last_id = id;
        signed
    }
}
