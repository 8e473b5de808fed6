//! Transaction inclusion and accumulator queries against anchor blocks.

use keel_core::testing::{ChainBuilder, TestProducer};
use keel_core::*;

fn receipt(body: &[u8]) -> TransactionReceipt {
    TransactionReceipt {
        status: TransactionStatus::Executed,
        cpu_usage_us: 250,
        net_usage_words: 16,
        trx: ReceiptTransaction::Packed(PackedTransaction {
            signatures: vec![Signature([0x20; 65])],
            compression: CompressionType::None,
            packed_context_free_data: Vec::new(),
            packed_trx: body.to_vec(),
        }),
    }
}

/// A client anchored at block 1000, whose block carries five receipts.
fn anchored_with_receipts() -> (LightClient, ChainBuilder, Vec<Digest>) {
    let receipts: Vec<TransactionReceipt> = (0u8..5).map(|i| receipt(&[i; 40])).collect();
    let leaves = receipt_digests(&receipts);
    let root = merkle_root(&leaves);

    let mut builder = ChainBuilder::new(TestProducer::roster(21), 1000);
    let global = GlobalState {
        chain_name: "remote".parse().unwrap(),
        chain_id: [0xC1; 32],
        consensus_algo: ConsensusAlgo::Pipeline,
    };
    let mut client = LightClient::new(ChainConfig::default(), global).unwrap();
    let merkle = builder.current_merkle().clone();
    let header = builder.produce_with(|header| header.transaction_mroot = root);
    client
        .initialize(header, builder.active_schedule().clone(), merkle)
        .unwrap();
    (client, builder, leaves)
}

#[test]
fn test_receipt_included_in_anchor_block() {
    let (client, _, leaves) = anchored_with_receipts();
    for (index, leaf) in leaves.iter().enumerate() {
        let path = merkle_path(&leaves, index).unwrap();
        client.verify_transaction_inclusion(1000, &path, leaf).unwrap();
    }
}

#[test]
fn test_tampered_path_rejected() {
    let (client, _, leaves) = anchored_with_receipts();
    let mut path = merkle_path(&leaves, 2).unwrap();
    path[2][5] ^= 1;
    assert!(matches!(
        client.verify_transaction_inclusion(1000, &path, &leaves[2]),
        Err(ChainError::Merkle(MerkleError::RootMismatch { .. }))
    ));
}

#[test]
fn test_self_consistent_forged_tree_rejected() {
    let (client, _, mut leaves) = anchored_with_receipts();
    leaves[4] = receipt(b"never executed").digest();
    let path = merkle_path(&leaves, 4).unwrap();
    assert_eq!(
        client.verify_transaction_inclusion(1000, &path, &leaves[4]),
        Err(ChainError::TransactionRootMismatch { block_num: 1000 })
    );
}

#[test]
fn test_non_anchor_block_rejected() {
    let (mut client, mut builder, leaves) = anchored_with_receipts();
    client
        .push_section(builder.produce_n(3), IncrementalMerkle::new())
        .unwrap();
    let path = merkle_path(&leaves, 0).unwrap();
    assert_eq!(
        client.verify_transaction_inclusion(1002, &path, &leaves[0]),
        Err(ChainError::NotAnchorBlock { block_num: 1002 })
    );
    assert_eq!(
        client.verify_transaction_inclusion(2000, &path, &leaves[0]),
        Err(ChainError::BlockNotFound { block_num: 2000 })
    );
}

#[test]
fn test_anchor_accumulator_nodes() {
    let (client, builder, _) = anchored_with_receipts();
    // The anchor's accumulator covers blocks 1..=999.
    let accumulator = builder.last_merkle();
    assert_eq!(accumulator.node_count, 999);

    let node = accumulator.node_by_layer(5).unwrap();
    client.assert_anchor_block_and_merkle_node(1000, 5, &node).unwrap();

    assert_eq!(
        client.assert_anchor_block_and_merkle_node(1000, 5, &[0u8; 32]),
        Err(ChainError::MerkleNodeMismatch { block_num: 1000, layer: 5 })
    );
    // 999 has no bit 3 set.
    assert!(matches!(
        client.assert_anchor_block_and_merkle_node(1000, 3, &node),
        Err(ChainError::Merkle(MerkleError::LayerNotRetained { layer: 3, .. }))
    ));
}

#[test]
fn test_anchor_transaction_root() {
    let (client, _, leaves) = anchored_with_receipts();
    client
        .assert_anchor_block_and_transaction_mroot(1000, &merkle_root(&leaves))
        .unwrap();
    assert_eq!(
        client.assert_anchor_block_and_transaction_mroot(1000, &[7u8; 32]),
        Err(ChainError::TransactionRootMismatch { block_num: 1000 })
    );
}
