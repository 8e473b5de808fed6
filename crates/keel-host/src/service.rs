//! One served chain: the light client plus the authority rules around it.
//!
//! Every entry point takes the caller's [`CallContext`]. Owner-only calls
//! manage configuration and relays; relay calls submit headers. Headers and
//! proofs arrive packed, exactly as relays fetch them from the remote chain.

use crate::auth::CallContext;
use crate::error::HostError;
use crate::history::MerkleHistory;
use crate::relays::{RelayAction, RelaySet};
use keel_core::{
    unpack, BatchProof, ChainConfig, Digest, GlobalState, IncrementalMerkle, LightClient, Name, ProducerSchedule,
    ProofType, PruneProgress, SignedBlockHeader,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainService {
    owner: Name,
    client: LightClient,
    relays: RelaySet,
    /// Accumulator snapshots, kept separately for each relay.
    merkle_history: BTreeMap<Name, MerkleHistory>,
}

impl ChainService {
    pub fn new(owner: Name, config: ChainConfig, global: GlobalState, relays: RelaySet) -> Result<Self, HostError> {
        Ok(Self {
            owner,
            client: LightClient::new(config, global)?,
            relays,
            merkle_history: BTreeMap::new(),
        })
    }

    pub fn owner(&self) -> Name {
        self.owner
    }

    pub fn client(&self) -> &LightClient {
        &self.client
    }

    pub fn is_relay(&self, account: Name) -> bool {
        self.relays.contains(account)
    }

    pub fn merkle_history(&self, relay: Name) -> Option<&MerkleHistory> {
        self.merkle_history.get(&relay)
    }

    // --- Owner calls ---

    /// Update chain name, consensus algorithm and parameters. The chain id
    /// keys this service in the registry and cannot change.
    pub fn set_global(&mut self, ctx: &CallContext, global: GlobalState, config: ChainConfig) -> Result<(), HostError> {
        ctx.require_owner(self.owner)?;
        let current = self.client.global().chain_id;
        if global.chain_id != current {
            return Err(HostError::ChainIdChange {
                current: hex::encode(current),
                requested: hex::encode(global.chain_id),
            });
        }
        self.client.set_config(config)?;
        self.client.set_global(global);
        Ok(())
    }

    pub fn relay_action(&mut self, ctx: &CallContext, action: &str, relay: Name) -> Result<(), HostError> {
        ctx.require_owner(self.owner)?;
        let action: RelayAction = action.parse()?;
        self.relays.apply(action, relay)
    }

    /// Wipe the chain, leaving it uninitialized.
    pub fn force_init(&mut self, ctx: &CallContext) -> Result<(), HostError> {
        ctx.require_owner(self.owner)?;
        self.client.force_reinitialize();
        Ok(())
    }

    // --- Owner or relay calls ---

    /// Initialize from a trusted header. The owner may do so at any time,
    /// replacing all stored state; a relay only while nothing is stored.
    #[instrument(skip_all, fields(caller = %ctx.caller))]
    pub fn chain_init(
        &mut self,
        ctx: &CallContext,
        header_data: &[u8],
        schedule: ProducerSchedule,
        blockroot_merkle: IncrementalMerkle,
    ) -> Result<(), HostError> {
        let header: SignedBlockHeader = unpack(header_data)?;
        if ctx.is(self.owner) {
            info!("owner reinitializing chain");
            self.client.reinitialize(header, schedule, blockroot_merkle)?;
            return Ok(());
        }
        if self.client.is_initialized() {
            return Err(keel_core::ChainError::AlreadyInitialized.into());
        }
        self.relays.require_relay(ctx)?;
        self.client.initialize(header, schedule, blockroot_merkle)?;
        Ok(())
    }

    // --- Relay calls ---

    #[instrument(skip_all, fields(caller = %ctx.caller, bytes = headers_data.len()))]
    pub fn push_section(
        &mut self,
        ctx: &CallContext,
        headers_data: &[u8],
        blockroot_merkle: IncrementalMerkle,
    ) -> Result<(), HostError> {
        self.relays.require_relay(ctx)?;
        let headers: Vec<SignedBlockHeader> = unpack(headers_data)?;
        self.client.push_section(headers, blockroot_merkle)?;
        Ok(())
    }

    #[instrument(skip_all, fields(caller = %ctx.caller, proof_type = %proof_type))]
    pub fn push_block_commits(
        &mut self,
        ctx: &CallContext,
        headers_data: &[u8],
        blockroot_merkle: IncrementalMerkle,
        proof_type: &str,
        proof_data: &[u8],
    ) -> Result<(), HostError> {
        self.relays.require_relay(ctx)?;
        let headers: Vec<SignedBlockHeader> = unpack(headers_data)?;
        let proof_type: ProofType = proof_type.parse().map_err(HostError::UnknownProofType)?;
        let proof = BatchProof::decode(proof_type, proof_data)?;
        self.client.push_block_commits(headers, blockroot_merkle, proof)?;
        Ok(())
    }

    pub fn remove_invalid_last_section(&mut self, ctx: &CallContext) -> Result<(), HostError> {
        self.relays.require_relay(ctx)?;
        self.client.remove_invalid_last_section()?;
        Ok(())
    }

    pub fn remove_first_section(&mut self, ctx: &CallContext) -> Result<PruneProgress, HostError> {
        self.relays.require_relay(ctx)?;
        Ok(self.client.remove_first_section()?)
    }

    /// Record `relay`'s accumulator snapshot at `block_num`.
    pub fn block_merkle(
        &mut self,
        ctx: &CallContext,
        relay: Name,
        block_num: u32,
        merkle: IncrementalMerkle,
    ) -> Result<(), HostError> {
        self.relays.require_relay(ctx)?;
        if ctx.caller != relay {
            return Err(HostError::RelayMismatch {
                caller: ctx.caller.to_string(),
                relay: relay.to_string(),
            });
        }
        self.merkle_history.entry(relay).or_default().record(block_num, merkle)
    }

    // --- Queries ---

    pub fn assert_anchor_block_and_merkle_node(&self, block_num: u32, layer: u32, digest: &Digest) -> Result<(), HostError> {
        Ok(self.client.assert_anchor_block_and_merkle_node(block_num, layer, digest)?)
    }

    pub fn assert_anchor_block_and_transaction_mroot(&self, block_num: u32, root: &Digest) -> Result<(), HostError> {
        Ok(self.client.assert_anchor_block_and_transaction_mroot(block_num, root)?)
    }

    pub fn verify_transaction_inclusion(&self, block_num: u32, path: &[Digest], leaf: &Digest) -> Result<(), HostError> {
        Ok(self.client.verify_transaction_inclusion(block_num, path, leaf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::BLOCK_MERKLE_INTERVAL;
    use keel_core::testing::{commits_for, ChainBuilder, TestProducer};
    use keel_core::{pack, ChainError, ConsensusAlgo};

    const CHAIN_ID: [u8; 32] = [0xC1; 32];

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn owner() -> CallContext {
        CallContext::signed(name("keel"))
    }

    fn relay() -> CallContext {
        CallContext::signed(name("relay1"))
    }

    fn service(consensus_algo: ConsensusAlgo) -> ChainService {
        let global = GlobalState {
            chain_name: name("remote"),
            chain_id: CHAIN_ID,
            consensus_algo,
        };
        let relays: RelaySet = [name("relay1")].into_iter().collect();
        ChainService::new(name("keel"), ChainConfig::default(), global, relays).unwrap()
    }

    fn init(service: &mut ChainService, ctx: &CallContext) -> Result<ChainBuilder, HostError> {
        let mut builder = ChainBuilder::new(TestProducer::roster(21), 1000);
        let merkle = builder.current_merkle().clone();
        let header = builder.produce();
        service.chain_init(ctx, &pack(&header), builder.active_schedule().clone(), merkle)?;
        Ok(builder)
    }

    #[test]
    fn test_relay_may_initialize_only_once() {
        let mut service = service(ConsensusAlgo::Pipeline);
        init(&mut service, &relay()).unwrap();
        assert_eq!(service.client().head_block_num(), Some(1000));

        assert_eq!(
            init(&mut service, &relay()).unwrap_err(),
            HostError::Chain(ChainError::AlreadyInitialized)
        );
        // The owner may always start over.
        init(&mut service, &owner()).unwrap();
    }

    #[test]
    fn test_strangers_cannot_initialize_or_push() {
        let mut service = service(ConsensusAlgo::Pipeline);
        let stranger = CallContext::signed(name("mallory"));
        assert!(matches!(init(&mut service, &stranger), Err(HostError::NotRelay { .. })));

        let mut builder = init(&mut service, &relay()).unwrap();
        let headers = pack(&builder.produce_n(3));
        assert!(matches!(
            service.push_section(&stranger, &headers, IncrementalMerkle::new()),
            Err(HostError::NotRelay { .. })
        ));
        assert!(matches!(
            service.push_section(&CallContext::unsigned(name("relay1")), &headers, IncrementalMerkle::new()),
            Err(HostError::MissingAuthorization { .. })
        ));
        service.push_section(&relay(), &headers, IncrementalMerkle::new()).unwrap();
        assert_eq!(service.client().head_block_num(), Some(1003));
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let mut service = service(ConsensusAlgo::Pipeline);
        init(&mut service, &relay()).unwrap();
        assert!(matches!(
            service.push_section(&relay(), &[3, 1, 2], IncrementalMerkle::new()),
            Err(HostError::Codec(_))
        ));
    }

    #[test]
    fn test_push_block_commits_with_packed_proof() {
        let mut service = service(ConsensusAlgo::Batch);
        let mut builder = init(&mut service, &relay()).unwrap();
        let merkle = builder.current_merkle().clone();
        let headers = builder.produce_n(5);
        let last = headers.last().unwrap();
        let proof = BatchProof::Commits(commits_for(
            &TestProducer::roster(21)[..15],
            last.block_num(),
            last.id(),
            CHAIN_ID,
            1,
        ));
        let (proof_type, proof_data) = proof.encode();

        assert!(matches!(
            service.push_block_commits(&relay(), &pack(&headers), merkle.clone(), "prepare", &proof_data),
            Err(HostError::UnknownProofType(_))
        ));
        service
            .push_block_commits(&relay(), &pack(&headers), merkle, &proof_type.to_string(), &proof_data)
            .unwrap();
        assert_eq!(service.client().last_anchor_block_num(), 1005);
    }

    #[test]
    fn test_owner_manages_relays_and_global() {
        let mut service = service(ConsensusAlgo::Pipeline);
        assert!(matches!(
            service.relay_action(&relay(), "add", name("relay2")),
            Err(HostError::NotOwner { .. })
        ));
        service.relay_action(&owner(), "add", name("relay2")).unwrap();
        assert!(service.is_relay(name("relay2")));
        service.relay_action(&owner(), "remove", name("relay1")).unwrap();
        assert!(!service.is_relay(name("relay1")));

        let global = GlobalState {
            chain_name: name("remote"),
            chain_id: CHAIN_ID,
            consensus_algo: ConsensusAlgo::Batch,
        };
        let bad = ChainConfig {
            lib_depth: 10,
            ..Default::default()
        };
        assert!(matches!(
            service.set_global(&owner(), global.clone(), bad),
            Err(HostError::Chain(ChainError::Config(_)))
        ));
        service.set_global(&owner(), global, ChainConfig::default()).unwrap();
        assert_eq!(service.client().global().consensus_algo, ConsensusAlgo::Batch);
    }

    #[test]
    fn test_chain_id_cannot_change() {
        let mut service = service(ConsensusAlgo::Pipeline);
        let moved = GlobalState {
            chain_name: name("remote"),
            chain_id: [0xC2; 32],
            consensus_algo: ConsensusAlgo::Pipeline,
        };
        assert!(matches!(
            service.set_global(&owner(), moved, ChainConfig::default()),
            Err(HostError::ChainIdChange { .. })
        ));
        assert_eq!(service.client().global().chain_id, CHAIN_ID);
    }

    #[test]
    fn test_force_init_is_owner_only() {
        let mut service = service(ConsensusAlgo::Pipeline);
        init(&mut service, &relay()).unwrap();
        assert!(service.force_init(&relay()).is_err());
        service.force_init(&owner()).unwrap();
        assert!(!service.client().is_initialized());
    }

    #[test]
    fn test_block_merkle_is_scoped_per_relay() {
        let mut service = service(ConsensusAlgo::Pipeline);
        service.relay_action(&owner(), "add", name("relay2")).unwrap();

        service
            .block_merkle(&relay(), name("relay1"), BLOCK_MERKLE_INTERVAL, IncrementalMerkle::new())
            .unwrap();
        assert!(matches!(
            service.block_merkle(&relay(), name("relay2"), BLOCK_MERKLE_INTERVAL, IncrementalMerkle::new()),
            Err(HostError::RelayMismatch { .. })
        ));
        service
            .block_merkle(
                &CallContext::signed(name("relay2")),
                name("relay2"),
                BLOCK_MERKLE_INTERVAL,
                IncrementalMerkle::new(),
            )
            .unwrap();

        assert_eq!(service.merkle_history(name("relay1")).unwrap().len(), 1);
        assert_eq!(service.merkle_history(name("relay2")).unwrap().len(), 1);
    }
}
