//! In-memory chain: block store, committed state and a pending pool

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cosign_consensus::{BlockGenerator, BlockMultiSigValidator, ChainService, ConsensusError, ConsensusResult};
use cosign_state::{
    execute_transactions, select_transactions, Address, Amount, Block, ExecutionOutcome, Hash, StateDB,
    StateError, StateSnapshot, Transaction,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::errors::{NodeError, NodeResult};

pub struct LocalChain {
    blocks: RwLock<Vec<Block>>,
    state: StateDB,
    pool: Mutex<Vec<Transaction>>,
    validator: BlockMultiSigValidator,
    height_tx: watch::Sender<u64>,
    gas_limit: u64,
}

impl LocalChain {
    pub fn new(config: &NodeConfig) -> Self {
        let genesis_state = StateSnapshot::with_accounts(
            config
                .genesis_alloc
                .iter()
                .map(|account| (account.address.clone(), account.balance)),
        );
        let genesis = Block::genesis(genesis_state.state_root(), config.genesis_timestamp);
        let (height_tx, _) = watch::channel(0);

        Self {
            blocks: RwLock::new(vec![genesis]),
            state: StateDB::new(genesis_state),
            pool: Mutex::new(Vec::new()),
            validator: BlockMultiSigValidator::new(Arc::new(config.consensus.producer_set())),
            height_tx,
            gas_limit: config.block_gas_limit,
        }
    }

    pub fn best_block(&self) -> Block {
        let blocks = self.blocks.read();
        blocks[blocks.len() - 1].clone()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        self.blocks.read().get(height as usize).cloned()
    }

    pub fn balance(&self, address: &Address) -> Amount {
        self.state.balance(address)
    }

    pub fn state_root(&self) -> Hash {
        self.state.state_root()
    }

    pub fn pending_count(&self) -> usize {
        self.pool.lock().len()
    }

    /// Queue a transaction for the next block this node leads
    pub fn submit_transaction(&self, tx: Transaction) -> NodeResult<()> {
        tx.validate()?;
        let committed_nonce = self.state.nonce(&tx.from);
        if tx.nonce < committed_nonce {
            return Err(NodeError::State(StateError::InvalidNonce {
                address: tx.from.clone(),
                expected: committed_nonce,
                got: tx.nonce,
            }));
        }
        debug!(from = %tx.from, nonce = tx.nonce, "transaction queued");
        self.pool.lock().push(tx);
        Ok(())
    }

    /// Verify a sealed block against the local tip and commit it.
    ///
    /// Re-importing the current tip is accepted as a no-op.
    pub fn import_block(&self, block: &Block) -> NodeResult<()> {
        let tip = self.best_block();
        if block.height() == tip.height() && block.hash() == tip.hash() {
            return Ok(());
        }
        if block.height() != tip.height() + 1 || block.header.previous_hash != tip.hash() {
            return Err(NodeError::UnknownParent {
                height: block.height(),
                tip: tip.height(),
            });
        }

        block.validate()?;
        self.validator.verify_body(block)?;

        let mut snapshot = self.state.snapshot();
        let outcome = execute_transactions(&mut snapshot, &block.transactions)?;
        if outcome.gas_used != block.header.gas_used {
            return Err(ConsensusError::GasUsed {
                expected: block.header.gas_used,
                actual: outcome.gas_used,
            }
            .into());
        }
        let rewards = self.validator.execute_block(block, &mut snapshot, outcome.gas_fee)?;

        let root = snapshot.state_root();
        if root != block.header.state_root {
            return Err(ConsensusError::StateRootMismatch {
                expected: hex::encode(block.header.state_root),
                actual: hex::encode(root),
            }
            .into());
        }

        self.state.commit(snapshot);
        self.blocks.write().push(block.clone());
        self.prune_pool();
        self.height_tx.send_replace(block.height());

        info!(
            height = block.height(),
            hash = %hex::encode(block.hash()),
            txs = block.transactions.len(),
            reward = rewards.total(),
            "block imported"
        );
        Ok(())
    }

    /// Drop pooled transactions the committed nonces have overtaken
    fn prune_pool(&self) {
        let mut pool = self.pool.lock();
        pool.retain(|tx| tx.nonce >= self.state.nonce(&tx.from));
    }

    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        now.max(self.best_block().header.timestamp + 1)
    }
}

impl ChainService for LocalChain {
    fn best_height(&self) -> u64 {
        self.blocks.read().len() as u64 - 1
    }

    fn best_hash(&self) -> Hash {
        self.best_block().hash()
    }

    fn state_snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    fn execute_block(&self, block: &Block, snapshot: &mut StateSnapshot) -> ConsensusResult<ExecutionOutcome> {
        Ok(execute_transactions(snapshot, &block.transactions)?)
    }

    fn subscribe_height(&self) -> watch::Receiver<u64> {
        self.height_tx.subscribe()
    }
}

impl BlockGenerator for LocalChain {
    fn generate_template(&self, snapshot: &mut StateSnapshot, coinbase: &Address) -> ConsensusResult<(Block, Amount)> {
        let mut candidates = self.pool.lock().clone();
        candidates.sort_by(|a, b| a.from.cmp(&b.from).then(a.nonce.cmp(&b.nonce)));

        let (transactions, outcome) = select_transactions(snapshot, candidates, self.gas_limit)?;
        let tip = self.best_block();
        let block = Block::new(
            tip.height() + 1,
            self.next_timestamp(),
            tip.hash(),
            transactions,
            self.gas_limit,
            outcome.gas_used,
            coinbase.clone(),
        )?;
        Ok((block, outcome.gas_fee))
    }
}
