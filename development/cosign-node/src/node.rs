//! Block producer node

use std::sync::Arc;

use cosign_consensus::{BftConsensus, ChainService, ConsensusError, PeerId};
use cosign_state::{Block, Transaction};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::LocalChain;
use crate::config::NodeConfig;
use crate::errors::NodeResult;
use crate::network::LocalNetwork;

pub struct ProducerNode {
    id: PeerId,
    config: NodeConfig,
    chain: Arc<LocalChain>,
    engine: BftConsensus,
    network: Arc<LocalNetwork>,
}

impl ProducerNode {
    /// Build the node and register it, offline, with `network`
    pub fn new(config: NodeConfig, network: Arc<LocalNetwork>) -> NodeResult<Arc<Self>> {
        config.validate()?;
        let id = config.peer_id();
        let chain = Arc::new(LocalChain::new(&config));
        let engine = BftConsensus::new(
            config.consensus.clone(),
            config.key()?,
            chain.clone(),
            chain.clone(),
            network.sender(id.clone()),
        )?;

        let node = Arc::new(Self {
            id,
            config,
            chain,
            engine,
            network: network.clone(),
        });
        network.register(&node);
        info!(node = %node.id, mode = ?node.config.consensus.consensus_mode, "producer node created");
        Ok(node)
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn chain(&self) -> &Arc<LocalChain> {
        &self.chain
    }

    pub fn engine(&self) -> &BftConsensus {
        &self.engine
    }

    pub fn submit_transaction(&self, tx: Transaction) -> NodeResult<()> {
        self.chain.submit_transaction(tx)
    }

    /// Run consensus for the next height, import the result and share it.
    ///
    /// A producer left out of the quorum ends its round with `ChainAdvanced`
    /// once the sealed block arrives; that block is its result.
    pub async fn produce_block(&self) -> NodeResult<Block> {
        let block = match self.engine.run().await {
            Ok(block) => block,
            Err(ConsensusError::ChainAdvanced { local, best }) => {
                let Some(block) = self.chain.block_at(local) else {
                    return Err(ConsensusError::ChainAdvanced { local, best }.into());
                };
                debug!(node = %self.id, height = local, "adopted block sealed without us");
                return Ok(block);
            }
            Err(e) => return Err(e.into()),
        };
        self.chain.import_block(&block)?;
        self.network.broadcast_block(&self.id, &block);
        Ok(block)
    }

    /// Import a block sealed elsewhere
    pub fn receive_block(&self, block: &Block) -> NodeResult<()> {
        self.chain.import_block(block)
    }

    /// Attempt a height every block interval until `shutdown` flips
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.consensus.start_miner {
            info!(node = %self.id, "block production disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.consensus.block_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.produce_block().await {
                        Ok(block) => info!(node = %self.id, height = block.height(), "height sealed"),
                        Err(e) => warn!(node = %self.id, height = self.chain.best_height() + 1, error = %e, "height not sealed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(node = %self.id, height = self.chain.best_height(), "producer stopped");
    }
}
