use keel_core::{ChainError, CodecError};
use thiserror::Error;

/// Failures of the host service around the light client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    // --- Authority ---
    #[error("Caller {caller} is not the owner {owner}")]
    NotOwner { caller: String, owner: String },

    #[error("Caller {caller} is not a listed relay")]
    NotRelay { caller: String },

    #[error("Caller {caller} did not authorize this call")]
    MissingAuthorization { caller: String },

    #[error("Caller {caller} cannot act for relay {relay}")]
    RelayMismatch { caller: String, relay: String },

    // --- Relay list ---
    #[error("Relay {0} is already listed")]
    RelayExists(String),

    #[error("Relay {0} is not listed")]
    RelayNotFound(String),

    #[error("Unknown relay action '{0}': expected 'add' or 'remove'")]
    UnknownRelayAction(String),

    // --- Registry ---
    #[error("No chain registered with id {0}")]
    UnknownChain(String),

    #[error("A chain with id {0} is already registered")]
    DuplicateChain(String),

    #[error("Chain id is fixed at {current}, cannot change it to {requested}")]
    ChainIdChange { current: String, requested: String },

    // --- Block merkle history ---
    #[error("Block merkle snapshot at block {block_num} must be at a multiple of {interval}")]
    MerkleNotAligned { block_num: u32, interval: u32 },

    #[error("Block merkle snapshot at block {0} already stored")]
    MerkleExists(u32),

    // --- Submissions ---
    #[error("Invalid proof type: {0}")]
    UnknownProofType(String),

    #[error("Malformed submission: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}
