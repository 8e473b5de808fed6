//! Producer signature verification.
//!
//! Remote-chain signatures are 65-byte compact recoverable secp256k1
//! signatures: a header byte `27 + 4 + recovery_id` followed by `r || s`.
//! Verification recovers the public key from the digest and compares it with
//! the key the producer schedule says should have signed.

use crate::error::ChainError;
use crate::merkle::hash_pair;
use crate::types::primitives::{Digest, PublicKey, Signature};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};

/// Lowest valid header byte: uncompressed key, recovery id 0.
const HEADER_BYTE_MIN: u8 = 27;
/// Highest valid header byte: compressed key, recovery id 3.
const HEADER_BYTE_MAX: u8 = 34;

/// The digest a producer signs for a block:
/// `sha256(sha256(header_digest || blockroot_merkle_root) || pending_schedule_hash)`.
///
/// Binding the accumulator root means a valid signature also commits to the
/// entire history of block ids before this block.
pub fn sig_digest(header_digest: &Digest, blockroot_merkle_root: &Digest, pending_schedule_hash: &Digest) -> Digest {
    let header_bmroot = hash_pair(header_digest, blockroot_merkle_root);
    hash_pair(&header_bmroot, pending_schedule_hash)
}

/// Recover the compressed public key that produced `signature` over `digest`.
pub fn recover_public_key(digest: &Digest, signature: &Signature) -> Result<PublicKey, ChainError> {
    let header = signature.0[0];
    if !(HEADER_BYTE_MIN..=HEADER_BYTE_MAX).contains(&header) {
        return Err(ChainError::InvalidSignature {
            reason: format!("header byte {} outside {}..={}", header, HEADER_BYTE_MIN, HEADER_BYTE_MAX),
        });
    }

    let recovery_id = RecoveryId::from_i32(i32::from((header - HEADER_BYTE_MIN) & 3)).map_err(|e| {
        ChainError::InvalidSignature {
            reason: e.to_string(),
        }
    })?;
    let recoverable = RecoverableSignature::from_compact(&signature.0[1..], recovery_id).map_err(|e| {
        ChainError::InvalidSignature {
            reason: e.to_string(),
        }
    })?;

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*digest);
    let key = secp
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| ChainError::InvalidSignature {
            reason: e.to_string(),
        })?;
    Ok(PublicKey(key.serialize()))
}

/// Fail unless `signature` over `digest` was made with `expected`.
pub fn assert_producer_signature(
    digest: &Digest,
    signature: &Signature,
    expected: &PublicKey,
) -> Result<(), ChainError> {
    let recovered = recover_public_key(digest, signature)?;
    if &recovered != expected {
        return Err(ChainError::SignatureKeyMismatch {
            expected: hex::encode(expected.0),
            recovered: hex::encode(recovered.0),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestProducer;
    use hex_literal::hex;
    use sha2::{Digest as _, Sha256};

    const DIGEST: Digest = hex!("9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08");

    #[test]
    fn test_sig_digest_layout() {
        let header_digest = [1u8; 32];
        let root = [2u8; 32];
        let schedule = [3u8; 32];

        let mut inner = Sha256::new();
        inner.update(header_digest);
        inner.update(root);
        let inner: Digest = inner.finalize().into();
        let mut outer = Sha256::new();
        outer.update(inner);
        outer.update(schedule);
        let expected: Digest = outer.finalize().into();

        assert_eq!(sig_digest(&header_digest, &root, &schedule), expected);
    }

    #[test]
    fn test_recover_signer() {
        let producer = TestProducer::new("alpha", 1);
        let signature = producer.sign(&DIGEST);
        assert!((31..=34).contains(&signature.0[0]));
        assert_eq!(recover_public_key(&DIGEST, &signature).unwrap(), producer.public_key());
        assert!(assert_producer_signature(&DIGEST, &signature, &producer.public_key()).is_ok());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let signer = TestProducer::new("alpha", 1);
        let other = TestProducer::new("beta", 2);
        let signature = signer.sign(&DIGEST);
        let err = assert_producer_signature(&DIGEST, &signature, &other.public_key()).unwrap_err();
        assert!(matches!(err, ChainError::SignatureKeyMismatch { .. }));
    }

    #[test]
    fn test_other_digest_recovers_other_key() {
        let signer = TestProducer::new("alpha", 1);
        let signature = signer.sign(&DIGEST);
        let mut tampered = DIGEST;
        tampered[31] ^= 1;
        assert!(assert_producer_signature(&tampered, &signature, &signer.public_key()).is_err());
    }

    #[test]
    fn test_bad_header_byte() {
        let mut signature = TestProducer::new("alpha", 1).sign(&DIGEST);
        signature.0[0] = 26;
        assert!(matches!(
            recover_public_key(&DIGEST, &signature),
            Err(ChainError::InvalidSignature { .. })
        ));
        signature.0[0] = 35;
        assert!(recover_public_key(&DIGEST, &signature).is_err());
    }
}
