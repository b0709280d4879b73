//! Chain collaborators consumed by the round driver

use cosign_state::{Address, Amount, Block, ExecutionOutcome, Hash, StateSnapshot};
use tokio::sync::watch;

use crate::ConsensusResult;

/// Read access to the local chain plus block re-execution
pub trait ChainService: Send + Sync {
    fn best_height(&self) -> u64;

    fn best_hash(&self) -> Hash;

    /// Working copy of the state at the tip
    fn state_snapshot(&self) -> StateSnapshot;

    /// Execute a block's transactions on `snapshot`
    fn execute_block(&self, block: &Block, snapshot: &mut StateSnapshot) -> ConsensusResult<ExecutionOutcome>;

    /// Best height updates, used to abandon rounds the chain has moved past
    fn subscribe_height(&self) -> watch::Receiver<u64>;
}

/// Leader-side block template source
pub trait BlockGenerator: Send + Sync {
    /// Build the next block on the tip, executing its transactions on
    /// `snapshot`; returns the block and the gas fee it collected
    fn generate_template(&self, snapshot: &mut StateSnapshot, coinbase: &Address) -> ConsensusResult<(Block, Amount)>;
}
