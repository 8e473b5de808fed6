//! PBFT quorum proof verification for batch-mode finality.
//!
//! A proof is a set of commit or checkpoint messages. Each message carries
//! the signer's public key; the signature over the message digest must
//! recover to that same key, and the key must belong to a producer of the
//! schedule active at the target block. Distinct producers are counted, so a
//! producer voting twice only counts once.

use crate::consensus::signature::recover_public_key;
use crate::error::ChainError;
use crate::types::header::ProducerSchedule;
use crate::types::pbft::{BatchProof, PbftCheckpoint, PbftCommit};
use crate::types::primitives::*;
use std::collections::BTreeSet;
use tracing::debug;

/// Common view of commit and checkpoint messages.
pub trait PbftMessage {
    fn block_num(&self) -> u32;
    fn block_id(&self) -> &BlockId;
    fn chain_id(&self) -> &ChainId;
    fn pub_key(&self) -> &PublicKey;
    fn signature(&self) -> &Signature;
    /// View number, for message kinds bound to a view.
    fn view(&self) -> Option<u32>;
    /// The digest the signer signed.
    fn signed_digest(&self) -> Digest;
}

impl PbftMessage for PbftCommit {
    fn block_num(&self) -> u32 {
        self.block_num
    }
    fn block_id(&self) -> &BlockId {
        &self.block_id
    }
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }
    fn pub_key(&self) -> &PublicKey {
        &self.pub_key
    }
    fn signature(&self) -> &Signature {
        &self.producer_signature
    }
    fn view(&self) -> Option<u32> {
        Some(self.view)
    }
    fn signed_digest(&self) -> Digest {
        self.digest()
    }
}

impl PbftMessage for PbftCheckpoint {
    fn block_num(&self) -> u32 {
        self.block_num
    }
    fn block_id(&self) -> &BlockId {
        &self.block_id
    }
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }
    fn pub_key(&self) -> &PublicKey {
        &self.pub_key
    }
    fn signature(&self) -> &Signature {
        &self.producer_signature
    }
    fn view(&self) -> Option<u32> {
        None
    }
    fn signed_digest(&self) -> Digest {
        self.digest()
    }
}

/// The block a quorum proof must attest to.
#[derive(Clone, Copy, Debug)]
pub struct QuorumTarget<'a> {
    pub block_num: u32,
    pub block_id: &'a BlockId,
    pub chain_id: &'a ChainId,
    /// Schedule active at the target block.
    pub schedule: &'a ProducerSchedule,
}

/// Verify that `messages` carry a quorum for `target`.
/// Returns the number of distinct producers that signed.
pub fn verify_quorum<M: PbftMessage>(
    messages: &[M],
    target: &QuorumTarget<'_>,
    quorum: usize,
) -> Result<usize, ChainError> {
    let first = messages.first().ok_or(ChainError::EmptyProof)?;
    let view = first.view();

    let mut signers = BTreeSet::new();
    for (index, message) in messages.iter().enumerate() {
        if message.block_num() != target.block_num || message.block_id() != target.block_id {
            return Err(ChainError::ProofMismatch {
                reason: format!(
                    "message {} is for block {} ({}), expected {} ({})",
                    index,
                    message.block_num(),
                    hex::encode(message.block_id()),
                    target.block_num,
                    hex::encode(target.block_id)
                ),
            });
        }
        if message.chain_id() != target.chain_id {
            return Err(ChainError::ProofMismatch {
                reason: format!("message {} is for chain {}", index, hex::encode(message.chain_id())),
            });
        }
        if message.view() != view {
            return Err(ChainError::ProofMismatch {
                reason: format!("message {} has view {:?}, expected {:?}", index, message.view(), view),
            });
        }

        let recovered = recover_public_key(&message.signed_digest(), message.signature())?;
        if &recovered != message.pub_key() {
            return Err(ChainError::SignatureKeyMismatch {
                expected: hex::encode(message.pub_key().0),
                recovered: hex::encode(recovered.0),
            });
        }

        let producer = target
            .schedule
            .producer_of(message.pub_key())
            .ok_or_else(|| ChainError::UnknownSigningKey {
                key: hex::encode(message.pub_key().0),
                schedule_version: target.schedule.version,
            })?;
        signers.insert(producer);
    }

    let required = if target.schedule.is_single_producer_test() {
        1
    } else {
        quorum
    };
    debug!(
        block_num = target.block_num,
        signers = signers.len(),
        required,
        "verified quorum proof"
    );
    if signers.len() < required {
        return Err(ChainError::InsufficientQuorum {
            signers: signers.len(),
            required,
        });
    }
    Ok(signers.len())
}

/// Verify a decoded batch proof of either kind.
pub fn verify_batch_proof(proof: &BatchProof, target: &QuorumTarget<'_>, quorum: usize) -> Result<usize, ChainError> {
    match proof {
        BatchProof::Commits(commits) => verify_quorum(commits, target, quorum),
        BatchProof::Checkpoints(checkpoints) => verify_quorum(checkpoints, target, quorum),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{checkpoints_for, commits_for, schedule_of, TestProducer};
    use crate::types::header::{ProducerKey, SINGLE_PRODUCER_NAME};

    const CHAIN_ID: ChainId = [0xC1; 32];
    const BLOCK_ID: BlockId = [0x0B; 32];

    fn target<'a>(schedule: &'a ProducerSchedule) -> QuorumTarget<'a> {
        QuorumTarget {
            block_num: 7,
            block_id: &BLOCK_ID,
            chain_id: &CHAIN_ID,
            schedule,
        }
    }

    #[test]
    fn test_fifteen_commits_pass_fourteen_fail() {
        let bps = TestProducer::roster(21);
        let schedule = schedule_of(1, &bps);

        let commits = commits_for(&bps[..15], 7, BLOCK_ID, CHAIN_ID, 2);
        assert_eq!(verify_quorum(&commits, &target(&schedule), 15).unwrap(), 15);

        let commits = commits_for(&bps[..14], 7, BLOCK_ID, CHAIN_ID, 2);
        assert_eq!(
            verify_quorum(&commits, &target(&schedule), 15),
            Err(ChainError::InsufficientQuorum { signers: 14, required: 15 })
        );
    }

    #[test]
    fn test_duplicate_signers_counted_once() {
        let bps = TestProducer::roster(21);
        let schedule = schedule_of(1, &bps);
        let mut commits = commits_for(&bps[..14], 7, BLOCK_ID, CHAIN_ID, 2);
        commits.extend(commits_for(&bps[..1], 7, BLOCK_ID, CHAIN_ID, 2));
        assert!(matches!(
            verify_quorum(&commits, &target(&schedule), 15),
            Err(ChainError::InsufficientQuorum { signers: 14, .. })
        ));
    }

    #[test]
    fn test_checkpoints_verify() {
        let bps = TestProducer::roster(21);
        let schedule = schedule_of(1, &bps);
        let checkpoints = checkpoints_for(&bps[..16], 7, BLOCK_ID, CHAIN_ID);
        let proof = BatchProof::Checkpoints(checkpoints);
        assert_eq!(verify_batch_proof(&proof, &target(&schedule), 15).unwrap(), 16);
    }

    #[test]
    fn test_mixed_views_rejected() {
        let bps = TestProducer::roster(21);
        let schedule = schedule_of(1, &bps);
        let mut commits = commits_for(&bps[..10], 7, BLOCK_ID, CHAIN_ID, 2);
        commits.extend(commits_for(&bps[10..16], 7, BLOCK_ID, CHAIN_ID, 3));
        assert!(matches!(
            verify_quorum(&commits, &target(&schedule), 15),
            Err(ChainError::ProofMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_block_or_chain_rejected() {
        let bps = TestProducer::roster(21);
        let schedule = schedule_of(1, &bps);

        let commits = commits_for(&bps[..15], 7, [0x0C; 32], CHAIN_ID, 2);
        assert!(matches!(
            verify_quorum(&commits, &target(&schedule), 15),
            Err(ChainError::ProofMismatch { .. })
        ));

        let commits = commits_for(&bps[..15], 7, BLOCK_ID, [0; 32], 2);
        assert!(matches!(
            verify_quorum(&commits, &target(&schedule), 15),
            Err(ChainError::ProofMismatch { .. })
        ));
    }

    #[test]
    fn test_forged_pub_key_rejected() {
        let bps = TestProducer::roster(21);
        let schedule = schedule_of(1, &bps);
        let mut commits = commits_for(&bps[..15], 7, BLOCK_ID, CHAIN_ID, 2);
        // Claim to be another producer without re-signing.
        commits[0].pub_key = bps[20].public_key();
        assert!(matches!(
            verify_quorum(&commits, &target(&schedule), 15),
            Err(ChainError::SignatureKeyMismatch { .. })
        ));
    }

    #[test]
    fn test_signer_outside_schedule_rejected() {
        let bps = TestProducer::roster(22);
        let schedule = schedule_of(1, &bps[..21]);
        let commits = commits_for(&bps[7..22], 7, BLOCK_ID, CHAIN_ID, 2);
        assert!(matches!(
            verify_quorum(&commits, &target(&schedule), 15),
            Err(ChainError::UnknownSigningKey { schedule_version: 1, .. })
        ));
    }

    #[test]
    fn test_single_producer_schedule_needs_one_vote() {
        let eosio = TestProducer::new("eosio", 99);
        let schedule = ProducerSchedule {
            version: 1,
            producers: vec![ProducerKey {
                producer_name: SINGLE_PRODUCER_NAME,
                block_signing_key: eosio.public_key(),
            }],
        };
        let commits = commits_for(std::slice::from_ref(&eosio), 7, BLOCK_ID, CHAIN_ID, 0);
        assert_eq!(verify_quorum(&commits, &target(&schedule), 15).unwrap(), 1);
    }

    #[test]
    fn test_empty_proof() {
        let schedule = ProducerSchedule::default();
        let commits: Vec<PbftCommit> = Vec::new();
        assert_eq!(verify_quorum(&commits, &target(&schedule), 15), Err(ChainError::EmptyProof));
    }
}
