//! Host configuration: the owner account and the chains to serve.

use anyhow::{Context, Result};
use keel_core::{ChainConfig, GlobalState, Name};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One remote chain served by this host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub global: GlobalState,
    #[serde(default)]
    pub config: ChainConfig,
    /// Relays allowed to submit from the start.
    #[serde(default)]
    pub relays: Vec<Name>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Account holding owner authority over every served chain.
    pub owner: Name,
    /// Where chain snapshots are saved on exit and loaded on start.
    pub snapshot_dir: PathBuf,
    #[serde(default)]
    pub chains: Vec<ChainEntry>,
}

impl HostConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: HostConfig = serde_json::from_str(json).context("invalid host config JSON")?;
        for entry in &config.chains {
            entry
                .config
                .validate()
                .with_context(|| format!("invalid config for chain {}", entry.global.chain_name))?;
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read host config {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("failed to load host config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ConsensusAlgo;

    const CONFIG: &str = r#"{
        "owner": "keel",
        "snapshot_dir": "/var/lib/keel",
        "chains": [
            {
                "global": {
                    "chain_name": "remote",
                    "chain_id": "c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1c1",
                    "consensus_algo": "batch"
                },
                "config": { "lib_depth": 100 },
                "relays": ["relay1", "relay2"]
            }
        ]
    }"#;

    #[test]
    fn test_parse_host_config() {
        let config = HostConfig::from_json_str(CONFIG).unwrap();
        assert_eq!(config.owner, "keel".parse().unwrap());
        assert_eq!(config.chains.len(), 1);

        let entry = &config.chains[0];
        assert_eq!(entry.global.consensus_algo, ConsensusAlgo::Batch);
        assert_eq!(entry.global.chain_id, [0xC1; 32]);
        assert_eq!(entry.config.lib_depth, 100);
        assert_eq!(entry.config.section_max_length, 1000);
        assert_eq!(entry.relays.len(), 2);
    }

    #[test]
    fn test_invalid_chain_config_rejected() {
        let json = CONFIG.replace("\"lib_depth\": 100", "\"lib_depth\": 20");
        let err = HostConfig::from_json_str(&json).unwrap_err();
        assert!(format!("{:#}", err).contains("lib_depth 20 out of range"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = HostConfig::load(Path::new("/nonexistent/keel.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read host config"));
    }
}
