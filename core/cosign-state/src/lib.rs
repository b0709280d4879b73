//! Ledger state for the cosign chain
//!
//! Accounts, transactions and blocks, plus an in-memory state database whose
//! snapshots carry a height-scoped credit journal so that reward crediting
//! can be replayed without double-counting.

pub mod account;
pub mod block;
pub mod errors;
pub mod executor;
pub mod state_db;
pub mod transaction;

pub use account::Account;
pub use block::{Block, BlockHeader, Proof, ProofKind};
pub use errors::{StateError, StateResult};
pub use executor::{execute_transactions, select_transactions, ExecutionOutcome};
pub use state_db::{StateDB, StateSnapshot};
pub use transaction::{gas_limits, Transaction};

/// Account address, lowercase hex without prefix
pub type Address = String;
pub type Hash = [u8; 32];
/// Token amount in base units
pub type Amount = u64;
pub type Nonce = u64;

/// One coin expressed in base units
pub const COIN: Amount = 1_000_000_000;

/// Balance crediting as seen by reward distribution.
///
/// Implementations must make `add_balance` idempotent per
/// `(address, height)`: crediting the same amount twice at the same height is
/// a no-op, crediting a different amount is an error.
pub trait BalanceStore {
    fn add_balance(&mut self, address: &Address, height: u64, amount: Amount) -> StateResult<()>;

    fn balance(&self, address: &Address) -> Amount;
}

/// SHA3-256 of `data`
pub fn sha3_hash(data: &[u8]) -> Hash {
    use sha3::{Digest, Sha3_256};

    let result = Sha3_256::digest(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
