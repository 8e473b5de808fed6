//! Chains served by this host, keyed by chain id.
//!
//! Downstream ledger logic asks the registry whether a block of a given
//! remote chain is anchored and whether a proof matches it. These queries
//! are read-only and never change chain state.

use crate::config::HostConfig;
use crate::error::HostError;
use crate::relays::RelaySet;
use crate::service::ChainService;
use crate::snapshot::{load_json, save_json};
use anyhow::{bail, Context};
use keel_core::{ChainId, Digest, Name};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<ChainId, ChainService>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One fresh, uninitialized service per configured chain.
    pub fn from_config(config: &HostConfig) -> Result<Self, HostError> {
        let mut registry = Self::new();
        for entry in &config.chains {
            let relays: RelaySet = entry.relays.iter().copied().collect();
            let service = ChainService::new(config.owner, entry.config.clone(), entry.global.clone(), relays)?;
            registry.register(service)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, service: ChainService) -> Result<(), HostError> {
        let chain_id = service.client().global().chain_id;
        if self.chains.contains_key(&chain_id) {
            return Err(HostError::DuplicateChain(hex::encode(chain_id)));
        }
        info!(chain_name = %service.client().global().chain_name, "chain registered");
        self.chains.insert(chain_id, service);
        Ok(())
    }

    pub fn get(&self, chain_id: &ChainId) -> Result<&ChainService, HostError> {
        self.chains
            .get(chain_id)
            .ok_or_else(|| HostError::UnknownChain(hex::encode(chain_id)))
    }

    pub fn get_mut(&mut self, chain_id: &ChainId) -> Result<&mut ChainService, HostError> {
        self.chains
            .get_mut(chain_id)
            .ok_or_else(|| HostError::UnknownChain(hex::encode(chain_id)))
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = &ChainId> + '_ {
        self.chains.keys()
    }

    pub fn is_relay(&self, chain_id: &ChainId, account: Name) -> Result<bool, HostError> {
        Ok(self.get(chain_id)?.is_relay(account))
    }

    pub fn assert_block_is_anchored_and_leaf_matches(
        &self,
        chain_id: &ChainId,
        block_num: u32,
        layer: u32,
        digest: &Digest,
    ) -> Result<(), HostError> {
        self.get(chain_id)?
            .assert_anchor_block_and_merkle_node(block_num, layer, digest)
    }

    pub fn assert_block_is_anchored_and_tx_root_matches(
        &self,
        chain_id: &ChainId,
        block_num: u32,
        transaction_mroot: &Digest,
    ) -> Result<(), HostError> {
        self.get(chain_id)?
            .assert_anchor_block_and_transaction_mroot(block_num, transaction_mroot)
    }

    pub fn verify_transaction_inclusion(
        &self,
        chain_id: &ChainId,
        block_num: u32,
        path: &[Digest],
        leaf: &Digest,
    ) -> Result<(), HostError> {
        self.get(chain_id)?.verify_transaction_inclusion(block_num, path, leaf)
    }

    // --- Persistence ---

    fn snapshot_path(dir: &Path, service: &ChainService) -> PathBuf {
        dir.join(format!("{}.json", service.client().global().chain_name))
    }

    /// Save every chain to `dir`, one file per chain.
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        for service in self.chains.values() {
            save_json(&Self::snapshot_path(dir, service), service)?;
        }
        Ok(())
    }

    /// Replace each registered chain with its snapshot in `dir`, if any.
    /// Returns how many chains were restored.
    pub fn restore(&mut self, dir: &Path) -> anyhow::Result<usize> {
        let mut restored = 0;
        for (chain_id, service) in self.chains.iter_mut() {
            let path = Self::snapshot_path(dir, service);
            let Some(saved) = load_json::<ChainService>(&path)? else {
                continue;
            };
            if &saved.client().global().chain_id != chain_id {
                bail!(
                    "snapshot {} belongs to chain {}, expected {}",
                    path.display(),
                    hex::encode(saved.client().global().chain_id),
                    hex::encode(chain_id)
                );
            }
            saved
                .client()
                .config()
                .validate()
                .with_context(|| format!("snapshot {} carries an invalid config", path.display()))?;
            *service = saved;
            restored += 1;
        }
        info!(restored, "chain snapshots restored");
        Ok(restored)
    }
}
