//! Transaction receipts of the remote chain.
//!
//! A block's `transaction_mroot` is the Merkle root over the digests of its
//! transaction receipts, so these digests are the leaves an inclusion proof
//! starts from.

use crate::codec::{CodecError, Pack, Reader, Unpack};
use crate::types::primitives::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    None = 0,
    Zlib = 1,
}

/// A transaction as it is carried inside a block, still in packed form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedTransaction {
    pub signatures: Vec<Signature>,
    pub compression: CompressionType,
    #[serde(with = "hex_bytes")]
    pub packed_context_free_data: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub packed_trx: Vec<u8>,
}

impl PackedTransaction {
    /// Digest committed to by the receipt: the prunable parts (signatures and
    /// context-free data) only enter through their own digest.
    pub fn packed_digest(&self) -> Digest {
        let mut prunable = Vec::new();
        self.signatures.pack(&mut prunable);
        self.packed_context_free_data.pack(&mut prunable);
        let prunable_digest: Digest = Sha256::digest(&prunable).into();

        let mut out = Vec::with_capacity(1 + 5 + self.packed_trx.len() + 32);
        self.compression.pack(&mut out);
        self.packed_trx.pack(&mut out);
        prunable_digest.pack(&mut out);
        Sha256::digest(&out).into()
    }

    /// Transaction id: SHA256 of the packed transaction body.
    pub fn id(&self) -> Digest {
        Sha256::digest(&self.packed_trx).into()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TransactionStatus {
    #[default]
    Executed = 0,
    SoftFail = 1,
    HardFail = 2,
    Delayed = 3,
    Expired = 4,
}

/// The receipt's transaction: either only its id (deferred transactions) or
/// the full packed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptTransaction {
    Id(#[serde(with = "hex_digest")] Digest),
    Packed(PackedTransaction),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub status: TransactionStatus,
    pub cpu_usage_us: u32,
    /// Packed as a varuint32.
    pub net_usage_words: u32,
    pub trx: ReceiptTransaction,
}

impl TransactionReceipt {
    /// Leaf digest of this receipt in the block's transaction Merkle tree.
    pub fn digest(&self) -> Digest {
        let mut out = Vec::new();
        self.status.pack(&mut out);
        self.cpu_usage_us.pack(&mut out);
        crate::codec::pack_varuint32(self.net_usage_words, &mut out);
        match &self.trx {
            ReceiptTransaction::Id(id) => id.pack(&mut out),
            ReceiptTransaction::Packed(trx) => trx.packed_digest().pack(&mut out),
        }
        Sha256::digest(&out).into()
    }

    pub fn trx_id(&self) -> Digest {
        match &self.trx {
            ReceiptTransaction::Id(id) => *id,
            ReceiptTransaction::Packed(trx) => trx.id(),
        }
    }
}

// --- Canonical encoding ---

impl Pack for CompressionType {
    fn pack(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
}

impl Unpack for CompressionType {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        match reader.read_u8()? {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zlib),
            tag => Err(CodecError::UnknownVariant {
                what: "compression type",
                tag: u32::from(tag),
            }),
        }
    }
}

impl Pack for TransactionStatus {
    fn pack(&self, out: &mut Vec<u8>) {
        out.push(*self as u8);
    }
}

impl Unpack for TransactionStatus {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        match reader.read_u8()? {
            0 => Ok(TransactionStatus::Executed),
            1 => Ok(TransactionStatus::SoftFail),
            2 => Ok(TransactionStatus::HardFail),
            3 => Ok(TransactionStatus::Delayed),
            4 => Ok(TransactionStatus::Expired),
            tag => Err(CodecError::UnknownVariant {
                what: "transaction status",
                tag: u32::from(tag),
            }),
        }
    }
}

impl Pack for PackedTransaction {
    fn pack(&self, out: &mut Vec<u8>) {
        self.signatures.pack(out);
        self.compression.pack(out);
        self.packed_context_free_data.pack(out);
        self.packed_trx.pack(out);
    }
}

impl Unpack for PackedTransaction {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            signatures: Vec::unpack(reader)?,
            compression: CompressionType::unpack(reader)?,
            packed_context_free_data: Vec::unpack(reader)?,
            packed_trx: Vec::unpack(reader)?,
        })
    }
}

impl Pack for TransactionReceipt {
    fn pack(&self, out: &mut Vec<u8>) {
        self.status.pack(out);
        self.cpu_usage_us.pack(out);
        crate::codec::pack_varuint32(self.net_usage_words, out);
        match &self.trx {
            ReceiptTransaction::Id(id) => {
                crate::codec::pack_varuint32(0, out);
                id.pack(out);
            }
            ReceiptTransaction::Packed(trx) => {
                crate::codec::pack_varuint32(1, out);
                trx.pack(out);
            }
        }
    }
}

impl Unpack for TransactionReceipt {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let status = TransactionStatus::unpack(reader)?;
        let cpu_usage_us = u32::unpack(reader)?;
        let net_usage_words = reader.read_varuint32()?;
        let trx = match reader.read_varuint32()? {
            0 => ReceiptTransaction::Id(<[u8; 32]>::unpack(reader)?),
            1 => ReceiptTransaction::Packed(PackedTransaction::unpack(reader)?),
            tag => {
                return Err(CodecError::UnknownVariant {
                    what: "receipt transaction",
                    tag,
                })
            }
        };
        Ok(Self {
            status,
            cpu_usage_us,
            net_usage_words,
            trx,
        })
    }
}

/// Leaf digests of a block's receipts, in block order.
pub fn receipt_digests(receipts: &[TransactionReceipt]) -> Vec<Digest> {
    receipts.iter().map(TransactionReceipt::digest).collect()
}

/// Digest of a receipt given in packed form.
pub fn packed_receipt_digest(bytes: &[u8]) -> Result<Digest, CodecError> {
    let receipt: TransactionReceipt = crate::codec::unpack(bytes)?;
    Ok(receipt.digest())
}
