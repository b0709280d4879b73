//! Consensus configuration

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConsensusError;
use crate::types::{Producer, ProducerSet};
use crate::ConsensusResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusMode {
    /// Multi-producer rounds
    Bft,
    /// Single producer signing alone
    Solo,
}

/// Consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BftConfig {
    pub consensus_mode: ConsensusMode,

    /// Ordered producer list, identical on every node
    pub producers: Vec<Producer>,

    /// Seconds between height attempts
    pub block_interval_secs: u64,

    /// Upper bound on every wait inside a round
    pub wait_time_ms: u64,

    /// Capacity of each inbound role queue
    pub msg_pool_size: usize,

    /// Take part in block production
    pub start_miner: bool,
}

impl Default for BftConfig {
    fn default() -> Self {
        let wait_time_ms = std::env::var("COSIGN_WAIT_TIME_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000);

        let block_interval_secs = std::env::var("COSIGN_BLOCK_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Self {
            consensus_mode: ConsensusMode::Bft,
            producers: Vec::new(),
            block_interval_secs,
            wait_time_ms,
            msg_pool_size: 1000,
            start_miner: true,
        }
    }
}

impl BftConfig {
    pub fn producer_set(&self) -> ProducerSet {
        ProducerSet::new(self.producers.clone())
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_secs(self.block_interval_secs)
    }

    pub fn validate(&self) -> ConsensusResult<()> {
        if self.producers.is_empty() {
            return Err(ConsensusError::BpConfig("producer set is empty".to_string()));
        }

        let mut keys = HashSet::new();
        let mut nodes = HashSet::new();
        for producer in &self.producers {
            if !keys.insert(producer.pubkey.to_bytes()) {
                return Err(ConsensusError::BpConfig(format!(
                    "duplicate producer key {}",
                    producer.pubkey.to_hex()
                )));
            }
            if !nodes.insert(producer.node.clone()) {
                return Err(ConsensusError::BpConfig(format!("duplicate producer node {}", producer.node)));
            }
        }

        if self.consensus_mode == ConsensusMode::Solo && self.producers.len() != 1 {
            return Err(ConsensusError::BpConfig(format!(
                "solo mode needs exactly one producer, got {}",
                self.producers.len()
            )));
        }
        if self.wait_time_ms == 0 {
            return Err(ConsensusError::BpConfig("wait time must be positive".to_string()));
        }
        Ok(())
    }
}
