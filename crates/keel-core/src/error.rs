use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::merkle::MerkleError;
use crate::types::chain::ConsensusAlgo;
use thiserror::Error;

/// Every way a submission or query against the light client can fail.
///
/// Any error aborts the whole call: nothing the call did is kept, and the
/// relay has to resubmit corrected data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    // --- Linkage ---
    #[error("Light client is not initialized")]
    NotInitialized,

    #[error("Light client is already initialized")]
    AlreadyInitialized,

    #[error("Empty header batch")]
    EmptyBatch,

    #[error("Unlinkable block {block_num}: the tail section ends at {section_last}")]
    UnlinkableBlock { block_num: u32, section_last: u32 },

    #[error("Block {block_num} does not link to its predecessor: expected previous {expected}, got {got}")]
    PreviousMismatch {
        block_num: u32,
        expected: String,
        got: String,
    },

    #[error("Block {block_num} repeated: identical id already stored")]
    BlockRepeated { block_num: u32 },

    #[error("Block {block_num} is not after the tail section root {section_first}")]
    HeaderBeforeSectionRoot { block_num: u32, section_first: u32 },

    #[error("New section block {block_num} must be more than one block past the tail section end {section_last}")]
    SectionGapRequired { block_num: u32, section_last: u32 },

    #[error("No header state stored for block {block_num}")]
    BlockNotFound { block_num: u32 },

    #[error("Block {block_num} is at or below the last anchor block {last_anchor} and cannot be rewritten")]
    FinalizedBlockRewrite { block_num: u32, last_anchor: u32 },

    // --- Producer schedules ---
    #[error("Producer schedule id {id} not found")]
    ScheduleNotFound { id: u64 },

    #[error("Producer {producer} not found in schedule id {schedule_id}")]
    ProducerNotFound { producer: String, schedule_id: u64 },

    #[error("Signing key {key} does not belong to any producer of schedule version {schedule_version}")]
    UnknownSigningKey { key: String, schedule_version: u32 },

    #[error("Block {block_num} declares schedule version {got}, expected {expected}")]
    ScheduleVersionMismatch {
        block_num: u32,
        expected: u32,
        got: u32,
    },

    #[error("Block {block_num} proposes new producers with version {got}, expected {expected}")]
    NewProducersVersion {
        block_num: u32,
        expected: u32,
        got: u32,
    },

    #[error("Block {block_num} proposes new producers while a rotation is still pending")]
    RotationAlreadyPending { block_num: u32 },

    #[error("Schedule rotation completed at block {block_num}, too soon after the proposal at {newprod_block_num} (minimum gap {min_gap})")]
    RotationTooFast {
        block_num: u32,
        newprod_block_num: u32,
        min_gap: u32,
    },

    #[error("Section root block {block_num} must not carry new producers")]
    SectionRootHasNewProducers { block_num: u32 },

    #[error("Slot {slot} belongs to producer {expected}, but block was produced by {got}")]
    ScheduledProducerMismatch {
        slot: u32,
        expected: String,
        got: String,
    },

    #[error("Producer {producer} repeated within the last {window} producers")]
    ProducerRepeated { producer: String, window: usize },

    #[error("Producer hand-off from {from} to {to} exceeds max span {max_span}")]
    ExceedMaxSpan {
        from: String,
        to: String,
        max_span: usize,
    },

    #[error("Producer schedule has {producers} producers, at least {required} required")]
    ScheduleTooSmall { producers: usize, required: usize },

    #[error("Invalid block slot 0")]
    InvalidSlot,

    // --- Signatures and proofs ---
    #[error("Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    #[error("Signature was produced by {recovered}, expected {expected}")]
    SignatureKeyMismatch { expected: String, recovered: String },

    #[error("Insufficient quorum: {signers} distinct producers signed, {required} required")]
    InsufficientQuorum { signers: usize, required: usize },

    #[error("Quorum proof does not match the target block: {reason}")]
    ProofMismatch { reason: String },

    #[error("Empty quorum proof")]
    EmptyProof,

    // --- Section and anchor state ---
    #[error("Section starting at {first} is not valid yet")]
    SectionNotValid { first: u32 },

    #[error("Cannot remove section: {reason}")]
    CannotRemoveSection { reason: &'static str },

    #[error("Block {block_num} is not an anchor block")]
    NotAnchorBlock { block_num: u32 },

    #[error("Accumulator node of anchor block {block_num} at layer {layer} does not match")]
    MerkleNodeMismatch { block_num: u32, layer: u32 },

    #[error("Provided transaction root does not match anchor block {block_num}")]
    TransactionRootMismatch { block_num: u32 },

    #[error("Operation requires {expected:?} consensus, chain is configured for {actual:?}")]
    WrongConsensusAlgo {
        expected: ConsensusAlgo,
        actual: ConsensusAlgo,
    },

    #[error("Internal inconsistency: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
