//! Node error types

use cosign_consensus::ConsensusError;
use cosign_state::StateError;
use thiserror::Error;

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Consensus error
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    /// State error
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Block does not extend the local tip
    #[error("Block {height} does not extend tip {tip}")]
    UnknownParent { height: u64, tip: u64 },

    /// Peer is not registered with the network
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
