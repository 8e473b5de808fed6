//! Append-only Merkle accumulator over block ids, plus the canonical
//! left/right pair hashing shared with transaction-root inclusion proofs.
//!
//! Both the accumulator and the full-tree root pad an odd level by pairing the
//! last node with itself, and both tag every pair before hashing: the high bit
//! of byte 0 is cleared on the left digest and set on the right one. That tag
//! is what lets a proof path say which side each sibling sits on, and it must
//! match the remote chain bit-for-bit or independently computed roots diverge.

use crate::codec::{CodecError, Pack, Reader, Unpack};
use crate::types::primitives::Digest;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// Errors during Merkle path verification and accumulator queries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Empty Merkle path: at least the leaf itself is required")]
    EmptyPath,

    #[error("Malformed Merkle path of length {len}: expected 1 or at least 3 entries")]
    MalformedPath { len: usize },

    #[error("Leaf {leaf} is not one of the first two entries of the Merkle path")]
    LeafNotInPath { leaf: String },

    #[error("Merkle path verification failed: computed root {computed} does not match path root {expected}")]
    RootMismatch { computed: String, expected: String },

    #[error("Accumulator with {node_count} leaves retains no node at layer {layer}")]
    LayerNotRetained { layer: u32, node_count: u64 },
}

const CANONICAL_BIT: u8 = 0x80;

/// Tag a digest as a left child.
pub fn make_canonical_left(value: &Digest) -> Digest {
    let mut out = *value;
    out[0] &= !CANONICAL_BIT;
    out
}

/// Tag a digest as a right child.
pub fn make_canonical_right(value: &Digest) -> Digest {
    let mut out = *value;
    out[0] |= CANONICAL_BIT;
    out
}

pub fn is_canonical_left(value: &Digest) -> bool {
    value[0] & CANONICAL_BIT == 0
}

pub fn is_canonical_right(value: &Digest) -> bool {
    value[0] & CANONICAL_BIT != 0
}

/// SHA256 of two digests concatenated, without tagging.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Hash a pair after tagging `left` as left and `right` as right.
pub fn hash_canonical_pair(left: &Digest, right: &Digest) -> Digest {
    hash_pair(&make_canonical_left(left), &make_canonical_right(right))
}

/// Depth of the implied tree holding `node_count` leaves (leaf level counts as 1).
fn calculate_max_depth(node_count: u64) -> u32 {
    if node_count == 0 {
        return 0;
    }
    node_count.next_power_of_two().trailing_zeros() + 1
}

/// Incremental Merkle tree state: O(log n) retained digests for n leaves.
///
/// `active_nodes` holds, from the lowest layer up, the root of every fully
/// realized left subtree (one per set bit of `node_count`), followed by the
/// current root. The root is always the last element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalMerkle {
    pub active_nodes: Vec<Digest>,
    pub node_count: u64,
}

impl IncrementalMerkle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf and return the new root.
    pub fn append(&mut self, digest: Digest) -> Digest {
        let mut partial = false;
        let max_depth = calculate_max_depth(self.node_count + 1);
        let mut current_depth = max_depth.saturating_sub(1);
        let mut index = self.node_count;
        let mut top = digest;
        let mut active_iter = self.active_nodes.iter();
        let mut updated = Vec::with_capacity(max_depth as usize);

        while current_depth > 0 {
            if index & 0x1 == 0 {
                // Collapsing a "left" value with an implied "right": the node is
                // only partially realized. The left value is itself complete
                // unless a partial node was already met lower down.
                if !partial {
                    updated.push(top);
                }
                top = hash_canonical_pair(&top, &top);
                partial = true;
            } else {
                // Collapsing a "right" value with a complete "left" from the
                // previous state. Future appends still need that left value
                // if the right side is partial.
                let left = match active_iter.next() {
                    Some(left) => *left,
                    // Only reachable with a corrupted state; treat the missing
                    // left as equal to the right, like an odd level.
                    None => top,
                };
                if partial {
                    updated.push(left);
                }
                top = hash_canonical_pair(&left, &top);
            }

            current_depth -= 1;
            index >>= 1;
        }

        updated.push(top);
        self.active_nodes = updated;
        self.node_count += 1;
        top
    }

    /// Current root, or all zeros for an empty accumulator.
    pub fn root(&self) -> Digest {
        if self.node_count == 0 {
            return [0u8; 32];
        }
        self.active_nodes.last().copied().unwrap_or([0u8; 32])
    }

    /// Root of the complete subtree of height `layer` retained by this state.
    /// Such a node exists only when bit `layer` of `node_count` is set.
    pub fn node_by_layer(&self, layer: u32) -> Option<Digest> {
        if layer >= 64 || self.node_count & (1u64 << layer) == 0 {
            return None;
        }
        let position = (self.node_count & ((1u64 << layer) - 1)).count_ones() as usize;
        self.active_nodes.get(position).copied()
    }

    /// Same as [`node_by_layer`](Self::node_by_layer) but with a descriptive error.
    pub fn require_node_by_layer(&self, layer: u32) -> Result<Digest, MerkleError> {
        self.node_by_layer(layer)
            .ok_or(MerkleError::LayerNotRetained {
                layer,
                node_count: self.node_count,
            })
    }
}

impl Pack for IncrementalMerkle {
    fn pack(&self, out: &mut Vec<u8>) {
        self.active_nodes.pack(out);
        self.node_count.pack(out);
    }
}

impl Unpack for IncrementalMerkle {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            active_nodes: Vec::unpack(reader)?,
            node_count: u64::unpack(reader)?,
        })
    }
}

/// Root of the full Merkle tree over `leaves`, built bottom-up.
/// This is how the remote chain computes transaction and action roots.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

fn next_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_canonical_pair(left, right),
            [single] => hash_canonical_pair(single, single),
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}

/// Build the inclusion path for `leaves[index]`.
///
/// Layout: `[pair_left, pair_right, tagged siblings…, root]`. The first two
/// entries are the untagged leaf pair at the bottom level; every later
/// sibling carries its side in the canonical bit. A single-leaf tree yields
/// `[leaf]`.
pub fn merkle_path(leaves: &[Digest], index: usize) -> Option<Vec<Digest>> {
    if index >= leaves.len() {
        return None;
    }
    if leaves.len() == 1 {
        return Some(vec![leaves[0]]);
    }

    let mut path = Vec::new();
    let mut level = leaves.to_vec();
    let mut position = index;
    let mut bottom = true;

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            if let Some(last) = level.last().copied() {
                level.push(last);
            }
        }
        if bottom {
            let base = position & !1;
            path.push(level[base]);
            path.push(level[base + 1]);
            bottom = false;
        } else {
            let sibling = level[position ^ 1];
            if position % 2 == 0 {
                path.push(make_canonical_right(&sibling));
            } else {
                path.push(make_canonical_left(&sibling));
            }
        }
        level = next_level(&level);
        position >>= 1;
    }

    path.push(level[0]);
    Some(path)
}

/// Verify that `leaf` is included under the root at the end of `path`.
/// Returns that root on success; callers must still check it against a
/// trusted commitment.
pub fn verify_merkle_path(path: &[Digest], leaf: &Digest) -> Result<Digest, MerkleError> {
    match path.len() {
        0 => return Err(MerkleError::EmptyPath),
        1 => {
            if &path[0] != leaf {
                return Err(MerkleError::RootMismatch {
                    computed: hex::encode(leaf),
                    expected: hex::encode(path[0]),
                });
            }
            return Ok(path[0]);
        }
        2 => return Err(MerkleError::MalformedPath { len: 2 }),
        _ => {}
    }

    if &path[0] != leaf && &path[1] != leaf {
        return Err(MerkleError::LeafNotInPath {
            leaf: hex::encode(leaf),
        });
    }

    let mut result = hash_canonical_pair(&path[0], &path[1]);
    for sibling in &path[2..path.len() - 1] {
        result = if is_canonical_left(sibling) {
            hash_pair(sibling, &make_canonical_right(&result))
        } else {
            hash_pair(&make_canonical_left(&result), sibling)
        };
    }

    let root = path[path.len() - 1];
    if result != root {
        return Err(MerkleError::RootMismatch {
            computed: hex::encode(result),
            expected: hex::encode(root),
        });
    }
    Ok(root)
}
