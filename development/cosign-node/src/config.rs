//! Node configuration

use std::path::Path;

use cosign_consensus::schnorr::PrivateKey;
use cosign_consensus::{account_address, BftConfig, ConsensusMode, PeerId, Producer};
use cosign_state::gas_limits::BLOCK_GAS_LIMIT;
use cosign_state::{Address, Amount, COIN};
use serde::{Deserialize, Serialize};

use crate::errors::{NodeError, NodeResult};

/// Funded account at genesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    pub balance: Amount,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Peer identity on the network
    pub node_id: String,

    /// Hex-encoded producer key
    pub private_key: String,

    /// Consensus configuration, shared by every producer
    #[serde(default)]
    pub consensus: BftConfig,

    /// Initial balances
    #[serde(default)]
    pub genesis_alloc: Vec<GenesisAccount>,

    /// Genesis block timestamp (unix seconds)
    #[serde(default = "default_genesis_timestamp")]
    pub genesis_timestamp: u64,

    /// Gas ceiling for blocks this node proposes
    #[serde(default = "default_block_gas_limit")]
    pub block_gas_limit: u64,
}

fn default_genesis_timestamp() -> u64 {
    1_700_000_000
}

fn default_block_gas_limit() -> u64 {
    BLOCK_GAS_LIMIT
}

impl NodeConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> NodeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> NodeResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId(self.node_id.clone())
    }

    pub fn key(&self) -> NodeResult<PrivateKey> {
        PrivateKey::from_hex(&self.private_key).map_err(|e| NodeError::Config(format!("invalid private key: {e}")))
    }

    pub fn validate(&self) -> NodeResult<()> {
        let key = self.key()?;
        self.consensus.validate()?;

        let me = self
            .consensus
            .producers
            .iter()
            .find(|p| p.pubkey == key.public_key())
            .ok_or_else(|| NodeError::Config("key is not in the producer list".to_string()))?;
        if self.block_gas_limit == 0 {
            return Err(NodeError::Config("block gas limit must be positive".to_string()));
        }
        if me.node.0 != self.node_id {
            return Err(NodeError::Config(format!(
                "producer entry names node {} but this node is {}",
                me.node, self.node_id
            )));
        }
        Ok(())
    }

    /// Configs for an `n`-producer network with every producer funded
    pub fn devnet(n: usize, mode: ConsensusMode) -> Vec<Self> {
        let keys: Vec<PrivateKey> = (0..n).map(|_| PrivateKey::generate()).collect();
        let producers: Vec<Producer> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| Producer {
                pubkey: key.public_key(),
                node: PeerId(format!("node-{i}")),
            })
            .collect();
        let genesis_alloc: Vec<GenesisAccount> = keys
            .iter()
            .map(|key| GenesisAccount {
                address: account_address(&key.public_key()),
                balance: 1_000 * COIN,
            })
            .collect();

        let consensus = BftConfig {
            consensus_mode: mode,
            producers,
            ..BftConfig::default()
        };

        keys.iter()
            .enumerate()
            .map(|(i, key)| NodeConfig {
                node_id: format!("node-{i}"),
                private_key: key.to_hex(),
                consensus: consensus.clone(),
                genesis_alloc: genesis_alloc.clone(),
                genesis_timestamp: default_genesis_timestamp(),
                block_gas_limit: default_block_gas_limit(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devnet_configs_validate() {
        let configs = NodeConfig::devnet(4, ConsensusMode::Bft);
        assert_eq!(configs.len(), 4);
        for config in &configs {
            config.validate().unwrap();
            assert_eq!(config.consensus.producers.len(), 4);
        }
    }

    #[test]
    fn test_config_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-0.json");

        let config = NodeConfig::devnet(1, ConsensusMode::Solo).remove(0);
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.node_id, config.node_id);
        assert_eq!(loaded.private_key, config.private_key);
        assert_eq!(loaded.consensus.consensus_mode, ConsensusMode::Solo);
        assert_eq!(loaded.genesis_alloc, config.genesis_alloc);
    }

    #[test]
    fn test_rejects_key_outside_producer_set() {
        let mut config = NodeConfig::devnet(2, ConsensusMode::Bft).remove(0);
        config.private_key = PrivateKey::generate().to_hex();
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }
}
