//! PBFT finality messages carried by batch-mode submissions.

use crate::codec::{pack, CodecError, Pack, Reader, Unpack};
use crate::types::primitives::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// A producer's vote that a block is committed in a given view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbftCommit {
    pub uuid: String,
    pub view: u32,
    pub block_num: u32,
    #[serde(with = "hex_digest")]
    pub block_id: BlockId,
    pub pub_key: PublicKey,
    #[serde(with = "hex_digest")]
    pub chain_id: ChainId,
    pub producer_signature: Signature,
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
}

impl PbftCommit {
    /// The digest the producer signs: every field except `uuid` and the signature.
    pub fn digest(&self) -> Digest {
        let mut out = Vec::with_capacity(4 + 4 + 32 + 34 + 32 + 8);
        self.view.pack(&mut out);
        self.block_num.pack(&mut out);
        self.block_id.pack(&mut out);
        self.pub_key.pack(&mut out);
        self.chain_id.pack(&mut out);
        self.timestamp.pack(&mut out);
        Sha256::digest(&out).into()
    }
}

/// A producer's vote that a block is a stable checkpoint. Unlike a commit it
/// is not bound to a view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbftCheckpoint {
    pub uuid: String,
    pub block_num: u32,
    #[serde(with = "hex_digest")]
    pub block_id: BlockId,
    pub pub_key: PublicKey,
    #[serde(with = "hex_digest")]
    pub chain_id: ChainId,
    pub producer_signature: Signature,
    pub timestamp: u64,
}

impl PbftCheckpoint {
    pub fn digest(&self) -> Digest {
        let mut out = Vec::with_capacity(4 + 32 + 34 + 32 + 8);
        self.block_num.pack(&mut out);
        self.block_id.pack(&mut out);
        self.pub_key.pack(&mut out);
        self.chain_id.pack(&mut out);
        self.timestamp.pack(&mut out);
        Sha256::digest(&out).into()
    }
}

impl Pack for PbftCommit {
    fn pack(&self, out: &mut Vec<u8>) {
        self.uuid.pack(out);
        self.view.pack(out);
        self.block_num.pack(out);
        self.block_id.pack(out);
        self.pub_key.pack(out);
        self.chain_id.pack(out);
        self.producer_signature.pack(out);
        self.timestamp.pack(out);
    }
}

impl Unpack for PbftCommit {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            uuid: String::unpack(reader)?,
            view: u32::unpack(reader)?,
            block_num: u32::unpack(reader)?,
            block_id: <[u8; 32]>::unpack(reader)?,
            pub_key: PublicKey::unpack(reader)?,
            chain_id: <[u8; 32]>::unpack(reader)?,
            producer_signature: Signature::unpack(reader)?,
            timestamp: u64::unpack(reader)?,
        })
    }
}

impl Pack for PbftCheckpoint {
    fn pack(&self, out: &mut Vec<u8>) {
        self.uuid.pack(out);
        self.block_num.pack(out);
        self.block_id.pack(out);
        self.pub_key.pack(out);
        self.chain_id.pack(out);
        self.producer_signature.pack(out);
        self.timestamp.pack(out);
    }
}

impl Unpack for PbftCheckpoint {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            uuid: String::unpack(reader)?,
            block_num: u32::unpack(reader)?,
            block_id: <[u8; 32]>::unpack(reader)?,
            pub_key: PublicKey::unpack(reader)?,
            chain_id: <[u8; 32]>::unpack(reader)?,
            producer_signature: Signature::unpack(reader)?,
            timestamp: u64::unpack(reader)?,
        })
    }
}

/// Which kind of PBFT message a batch submission's proof carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    Commit,
    Checkpoint,
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofType::Commit => write!(f, "commit"),
            ProofType::Checkpoint => write!(f, "checkpoint"),
        }
    }
}

impl FromStr for ProofType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(ProofType::Commit),
            "checkpoint" => Ok(ProofType::Checkpoint),
            other => Err(format!("Unknown proof type '{}'", other)),
        }
    }
}

/// A decoded quorum proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "messages", rename_all = "snake_case")]
pub enum BatchProof {
    Commits(Vec<PbftCommit>),
    Checkpoints(Vec<PbftCheckpoint>),
}

impl BatchProof {
    /// Decode packed proof bytes according to the declared proof type.
    pub fn decode(proof_type: ProofType, data: &[u8]) -> Result<Self, CodecError> {
        match proof_type {
            ProofType::Commit => Ok(BatchProof::Commits(crate::codec::unpack(data)?)),
            ProofType::Checkpoint => Ok(BatchProof::Checkpoints(crate::codec::unpack(data)?)),
        }
    }

    pub fn encode(&self) -> (ProofType, Vec<u8>) {
        match self {
            BatchProof::Commits(commits) => (ProofType::Commit, pack(commits)),
            BatchProof::Checkpoints(checkpoints) => (ProofType::Checkpoint, pack(checkpoints)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchProof::Commits(commits) => commits.len(),
            BatchProof::Checkpoints(checkpoints) => checkpoints.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
