//! Cosign Node - producer node and in-process devnet

pub mod chain;
pub mod cli;
pub mod config;
pub mod errors;
pub mod network;
pub mod node;

pub use chain::LocalChain;
pub use config::{GenesisAccount, NodeConfig};
pub use errors::{NodeError, NodeResult};
pub use network::LocalNetwork;
pub use node::ProducerNode;
