//! # Keel Core
//!
//! Pure Rust light client for EOSIO-style remote chains.
//!
//! This crate contains **no storage or networking code**. It is the
//! verification heart of Keel: every remote block header and every
//! transaction inclusion claim passes through these functions before it is
//! trusted.
//!
//! ## Trust Model
//!
//! - **Header chain** (`consensus` module): Verifies producer signatures over
//!   each header, its accumulator of all earlier block ids, and the pending
//!   producer schedule. Finality comes either from depth (a section is final
//!   once `lib_depth` blocks deep under an unchanged schedule) or from a PBFT
//!   quorum of the active producers.
//!
//! - **Inclusion proofs** (`merkle` module): Verifies canonical Merkle paths
//!   from a transaction receipt digest up to the transaction root of an
//!   anchor block. Zero trust assumptions beyond the anchored header.
//!
//! ## Usage
//!
//! ```ignore
//! use keel_core::consensus::LightClient;
//! use keel_core::{ChainConfig, GlobalState};
//!
//! let mut client = LightClient::new(ChainConfig::default(), global)?;
//! client.initialize(header, schedule, blockroot_merkle)?;
//! client.push_section(headers, blockroot_merkle)?;
//! client.verify_transaction_inclusion(block_num, &path, &receipt_digest)?;
//! ```

pub mod codec;
pub mod config;
pub mod consensus;
pub mod error;
pub mod merkle;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types for convenience
pub use codec::{digest_of, pack, unpack, CodecError, Pack, Unpack};
pub use config::{ChainConfig, ConfigError, ScheduleHashMode};
pub use consensus::{
    chain::{LightClient, PruneProgress},
    pbft::{verify_batch_proof, verify_quorum, QuorumTarget},
    schedule::{schedule_hash, ProducerScheduleStore},
    signature::{assert_producer_signature, recover_public_key, sig_digest},
};
pub use error::ChainError;
pub use merkle::{merkle_path, merkle_root, verify_merkle_path, IncrementalMerkle, MerkleError};
pub use types::{chain::*, header::*, pbft::*, primitives::*, receipt::*};
