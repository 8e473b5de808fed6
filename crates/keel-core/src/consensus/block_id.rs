//! Block identity: header digest, block id and the number embedded in an id.

use crate::codec::digest_of;
use crate::types::header::BlockHeader;
use crate::types::primitives::{BlockId, Digest};

/// Recover the block number embedded in the first 4 bytes of a block id.
pub fn num_from_id(id: &BlockId) -> u32 {
    u32::from_be_bytes([id[0], id[1], id[2], id[3]])
}

/// Overwrite the first 4 bytes of `digest` with `block_num`, big-endian.
pub fn id_from_digest(digest: Digest, block_num: u32) -> BlockId {
    let mut id = digest;
    id[..4].copy_from_slice(&block_num.to_be_bytes());
    id
}

impl BlockHeader {
    /// SHA256 over the packed header fields, in declaration order.
    pub fn digest(&self) -> Digest {
        digest_of(self)
    }

    /// This header's number: one past the number embedded in `previous`.
    pub fn block_num(&self) -> u32 {
        num_from_id(&self.previous).wrapping_add(1)
    }

    /// The block id: the digest with the block number stamped over its first 4 bytes.
    pub fn id(&self) -> BlockId {
        id_from_digest(self.digest(), self.block_num())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::header::BlockTimestamp;
    use hex_literal::hex;
    use proptest::prelude::*;

    fn header_after(previous: BlockId) -> BlockHeader {
        BlockHeader {
            timestamp: BlockTimestamp::from_slot(42),
            producer: "alpha".parse().unwrap(),
            previous,
            ..Default::default()
        }
    }

    #[test]
    fn test_num_from_id_reads_big_endian_prefix() {
        let id = hex!("0000270fffffffffffffffffffffffffffffffffffffffffffffffffffffffff");
        assert_eq!(num_from_id(&id), 9999);
    }

    #[test]
    fn test_id_embeds_block_number() {
        let previous = id_from_digest([0xAB; 32], 999);
        let header = header_after(previous);
        let id = header.id();

        assert_eq!(header.block_num(), 1000);
        assert_eq!(num_from_id(&id), 1000);
        assert_eq!(&id[..4], &1000u32.to_be_bytes());
        assert_eq!(id[4..], header.digest()[4..]);
    }

    #[test]
    fn test_id_changes_with_any_field() {
        let header = header_after(id_from_digest([0; 32], 10));
        let mut other = header.clone();
        other.action_mroot = [1; 32];
        assert_ne!(header.id(), other.id());
        assert_eq!(num_from_id(&header.id()), num_from_id(&other.id()));
    }

    proptest! {
        #[test]
        fn prop_id_number_and_determinism(prev in any::<[u8; 32]>(), tx_root in any::<[u8; 32]>(), slot in any::<u32>()) {
            let mut header = header_after(prev);
            header.transaction_mroot = tx_root;
            header.timestamp = BlockTimestamp::from_slot(slot);
            let id = header.id();
            prop_assert_eq!(num_from_id(&id), num_from_id(&prev).wrapping_add(1));
            prop_assert_eq!(id, header.id());
        }
    }
}
