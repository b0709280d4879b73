//! Error types for state management

use thiserror::Error;

/// State management errors
#[derive(Error, Debug)]
pub enum StateError {
    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Insufficient balance
    #[error("Insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    /// Nonce does not follow the account's current nonce
    #[error("Invalid nonce for {address}: expected {expected}, got {got}")]
    InvalidNonce { address: String, expected: u64, got: u64 },

    /// Invalid transaction
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Invalid block
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// A second, different credit for an address at a height already credited
    #[error("Conflicting credit for {address} at height {height}: recorded {recorded}, requested {requested}")]
    ConflictingCredit {
        address: String,
        height: u64,
        recorded: u64,
        requested: u64,
    },

    /// Arithmetic overflow on a balance
    #[error("Balance overflow for {0}")]
    BalanceOverflow(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl From<String> for StateError {
    fn from(s: String) -> Self {
        StateError::Other(s)
    }
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;
