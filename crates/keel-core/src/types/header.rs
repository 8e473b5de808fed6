use crate::codec::{pack_varuint32, CodecError, Pack, Reader, Unpack};
use crate::types::primitives::*;
use serde::{Deserialize, Serialize};

/// Block interval on the remote chain, in milliseconds.
pub const BLOCK_INTERVAL_MS: u64 = 500;

/// Epoch of the remote chain's block timestamps (2000-01-01T00:00:00Z) in Unix milliseconds.
pub const BLOCK_TIMESTAMP_EPOCH_MS: u64 = 946_684_800_000;

/// Block production slot: number of 500 ms intervals since the timestamp epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockTimestamp {
    pub slot: u32,
}

impl BlockTimestamp {
    pub const fn from_slot(slot: u32) -> Self {
        Self { slot }
    }

    /// Unix time in milliseconds at the start of this slot.
    pub fn to_unix_millis(&self) -> u64 {
        BLOCK_TIMESTAMP_EPOCH_MS + u64::from(self.slot) * BLOCK_INTERVAL_MS
    }
}

/// A producer and the key it signs blocks with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerKey {
    pub producer_name: Name,
    pub block_signing_key: PublicKey,
}

/// An ordered, versioned list of block producers.
/// The order matters: it determines whose turn each slot is.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSchedule {
    pub version: u32,
    pub producers: Vec<ProducerKey>,
}

impl ProducerSchedule {
    /// Look up the signing key of a producer.
    pub fn key_of(&self, producer: Name) -> Option<&PublicKey> {
        self.producers
            .iter()
            .find(|p| p.producer_name == producer)
            .map(|p| &p.block_signing_key)
    }

    /// Look up which producer signs with `key`.
    pub fn producer_of(&self, key: &PublicKey) -> Option<Name> {
        self.producers
            .iter()
            .find(|p| &p.block_signing_key == key)
            .map(|p| p.producer_name)
    }

    /// Position of a producer in the schedule order.
    pub fn position_of(&self, producer: Name) -> Option<usize> {
        self.producers
            .iter()
            .position(|p| p.producer_name == producer)
    }

    /// A schedule with a single producer named `eosio` is a local test network.
    /// Such schedules are exempt from rotation-window and quorum-size rules.
    pub fn is_single_producer_test(&self) -> bool {
        self.producers.len() == 1 && self.producers[0].producer_name == SINGLE_PRODUCER_NAME
    }

    /// The weighted-authority form of this schedule: each producer becomes a
    /// threshold-1 authority over its single key.
    pub fn to_authority_schedule(&self) -> ProducerAuthoritySchedule {
        ProducerAuthoritySchedule {
            version: self.version,
            producers: self
                .producers
                .iter()
                .map(|p| ProducerAuthority {
                    producer_name: p.producer_name,
                    authority: BlockSigningAuthority::V0 {
                        threshold: 1,
                        keys: vec![KeyWeight {
                            key: p.block_signing_key,
                            weight: 1,
                        }],
                    },
                })
                .collect(),
        }
    }
}

/// Name of the sole producer on a single-node test chain (`eosio`).
pub const SINGLE_PRODUCER_NAME: Name = Name::new(0x5530_EA00_0000_0000);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWeight {
    pub key: PublicKey,
    pub weight: u16,
}

/// Weighted multi-key signing authority used by the extended schedule format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockSigningAuthority {
    V0 { threshold: u32, keys: Vec<KeyWeight> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerAuthority {
    pub producer_name: Name,
    pub authority: BlockSigningAuthority,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerAuthoritySchedule {
    pub version: u32,
    pub producers: Vec<ProducerAuthority>,
}

/// An opaque header extension (type id + payload).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderExtension {
    pub kind: u16,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// A remote chain block header. Immutable once signed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub timestamp: BlockTimestamp,
    pub producer: Name,
    pub confirmed: u16,
    /// Id of the parent block; its first 4 bytes carry the parent's number.
    #[serde(with = "hex_digest")]
    pub previous: BlockId,
    #[serde(with = "hex_digest")]
    pub transaction_mroot: Digest,
    #[serde(with = "hex_digest")]
    pub action_mroot: Digest,
    /// Version of the schedule that was active when this block was produced.
    pub schedule_version: u32,
    /// Present only on the block that proposes a new producer schedule.
    pub new_producers: Option<ProducerSchedule>,
    pub header_extensions: Vec<HeaderExtension>,
}

/// A header together with its producer's signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlockHeader {
    pub header: BlockHeader,
    pub producer_signature: Signature,
}

impl SignedBlockHeader {
    pub fn block_num(&self) -> u32 {
        self.header.block_num()
    }

    pub fn id(&self) -> BlockId {
        self.header.id()
    }
}

// --- Canonical encoding ---

impl Pack for BlockTimestamp {
    fn pack(&self, out: &mut Vec<u8>) {
        self.slot.pack(out);
    }
}

impl Unpack for BlockTimestamp {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            slot: u32::unpack(reader)?,
        })
    }
}

impl Pack for ProducerKey {
    fn pack(&self, out: &mut Vec<u8>) {
        self.producer_name.pack(out);
        self.block_signing_key.pack(out);
    }
}

impl Unpack for ProducerKey {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            producer_name: Name::unpack(reader)?,
            block_signing_key: PublicKey::unpack(reader)?,
        })
    }
}

impl Pack for ProducerSchedule {
    fn pack(&self, out: &mut Vec<u8>) {
        self.version.pack(out);
        self.producers.pack(out);
    }
}

impl Unpack for ProducerSchedule {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: u32::unpack(reader)?,
            producers: Vec::unpack(reader)?,
        })
    }
}

impl Pack for KeyWeight {
    fn pack(&self, out: &mut Vec<u8>) {
        self.key.pack(out);
        self.weight.pack(out);
    }
}

impl Pack for BlockSigningAuthority {
    fn pack(&self, out: &mut Vec<u8>) {
        match self {
            BlockSigningAuthority::V0 { threshold, keys } => {
                pack_varuint32(0, out);
                threshold.pack(out);
                keys.pack(out);
            }
        }
    }
}

impl Pack for ProducerAuthority {
    fn pack(&self, out: &mut Vec<u8>) {
        self.producer_name.pack(out);
        self.authority.pack(out);
    }
}

impl Pack for ProducerAuthoritySchedule {
    fn pack(&self, out: &mut Vec<u8>) {
        self.version.pack(out);
        self.producers.pack(out);
    }
}

impl Pack for HeaderExtension {
    fn pack(&self, out: &mut Vec<u8>) {
        self.kind.pack(out);
        self.data.pack(out);
    }
}

impl Unpack for HeaderExtension {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            kind: u16::unpack(reader)?,
            data: Vec::unpack(reader)?,
        })
    }
}

impl Pack for BlockHeader {
    fn pack(&self, out: &mut Vec<u8>) {
        self.timestamp.pack(out);
        self.producer.pack(out);
        self.confirmed.pack(out);
        self.previous.pack(out);
        self.transaction_mroot.pack(out);
        self.action_mroot.pack(out);
        self.schedule_version.pack(out);
        self.new_producers.pack(out);
        self.header_extensions.pack(out);
    }
}

impl Unpack for BlockHeader {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            timestamp: BlockTimestamp::unpack(reader)?,
            producer: Name::unpack(reader)?,
            confirmed: u16::unpack(reader)?,
            previous: <[u8; 32]>::unpack(reader)?,
            transaction_mroot: <[u8; 32]>::unpack(reader)?,
            action_mroot: <[u8; 32]>::unpack(reader)?,
            schedule_version: u32::unpack(reader)?,
            new_producers: Option::unpack(reader)?,
            header_extensions: Vec::unpack(reader)?,
        })
    }
}

impl Pack for SignedBlockHeader {
    fn pack(&self, out: &mut Vec<u8>) {
        self.header.pack(out);
        self.producer_signature.pack(out);
    }
}

impl Unpack for SignedBlockHeader {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            header: BlockHeader::unpack(reader)?,
            producer_signature: Signature::unpack(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{pack, unpack};

    fn producer(name: &str, key_byte: u8) -> ProducerKey {
        ProducerKey {
            producer_name: name.parse().unwrap(),
            block_signing_key: PublicKey([key_byte; PUBLIC_KEY_LEN]),
        }
    }

    #[test]
    fn test_single_producer_name_constant() {
        assert_eq!(SINGLE_PRODUCER_NAME.to_string(), "eosio");
    }

    #[test]
    fn test_schedule_lookups() {
        let schedule = ProducerSchedule {
            version: 3,
            producers: vec![producer("alpha", 1), producer("bravo", 2)],
        };
        let bravo: Name = "bravo".parse().unwrap();

        assert_eq!(schedule.key_of(bravo), Some(&PublicKey([2; PUBLIC_KEY_LEN])));
        assert_eq!(schedule.producer_of(&PublicKey([1; PUBLIC_KEY_LEN])), Some("alpha".parse().unwrap()));
        assert_eq!(schedule.position_of(bravo), Some(1));
        assert_eq!(schedule.key_of("charlie".parse().unwrap()), None);
        assert!(!schedule.is_single_producer_test());
    }

    #[test]
    fn test_single_producer_detection() {
        let schedule = ProducerSchedule {
            version: 0,
            producers: vec![producer("eosio", 7)],
        };
        assert!(schedule.is_single_producer_test());

        let lone_other = ProducerSchedule {
            version: 0,
            producers: vec![producer("alpha", 7)],
        };
        assert!(!lone_other.is_single_producer_test());
    }

    #[test]
    fn test_signed_header_decodes_from_packed_bytes() {
        let header = SignedBlockHeader {
            header: BlockHeader {
                timestamp: BlockTimestamp::from_slot(1234),
                producer: "alpha".parse().unwrap(),
                confirmed: 0,
                previous: [0x11; 32],
                transaction_mroot: [0x22; 32],
                action_mroot: [0x33; 32],
                schedule_version: 2,
                new_producers: Some(ProducerSchedule {
                    version: 3,
                    producers: vec![producer("bravo", 2)],
                }),
                header_extensions: vec![HeaderExtension {
                    kind: 1,
                    data: vec![0xde, 0xad],
                }],
            },
            producer_signature: Signature([0x1f; SIGNATURE_LEN]),
        };

        let bytes = pack(&header);
        let decoded: SignedBlockHeader = unpack(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_authority_schedule_wraps_each_key() {
        let schedule = ProducerSchedule {
            version: 5,
            producers: vec![producer("alpha", 1)],
        };
        let authority = schedule.to_authority_schedule();
        assert_eq!(authority.version, 5);
        match &authority.producers[0].authority {
            BlockSigningAuthority::V0 { threshold, keys } => {
                assert_eq!(*threshold, 1);
                assert_eq!(keys.len(), 1);
                assert_eq!(keys[0].weight, 1);
            }
        }
        // variant tag + threshold + key list sit between the name and the end
        assert_ne!(pack(&authority), pack(&schedule));
    }

    #[test]
    fn test_timestamp_to_unix_millis() {
        assert_eq!(BlockTimestamp::from_slot(0).to_unix_millis(), 946_684_800_000);
        assert_eq!(BlockTimestamp::from_slot(2).to_unix_millis(), 946_684_801_000);
    }
}
