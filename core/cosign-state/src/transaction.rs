//! Transaction types

use serde::{Deserialize, Serialize};

use crate::{sha3_hash, Address, Amount, Hash, StateError, StateResult};

/// Gas schedule
pub mod gas_limits {
    /// Plain value transfer
    pub const TRANSFER: u64 = 21_000;

    /// Upper bound on gas consumed by one block
    pub const BLOCK_GAS_LIMIT: u64 = 18_000_000;
}

/// Value transfer between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub nonce: u64,
    /// Price per gas unit in base units
    pub gas_price: u64,
    pub gas_limit: u64,
}

impl Transaction {
    pub fn transfer(from: impl Into<Address>, to: impl Into<Address>, amount: Amount, nonce: u64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
            nonce,
            gas_price: 1,
            gas_limit: gas_limits::TRANSFER,
        }
    }

    /// SHA3-256 over the bincode encoding
    pub fn hash(&self) -> StateResult<Hash> {
        let bytes = bincode::serialize(self)?;
        Ok(sha3_hash(&bytes))
    }

    /// Gas this transaction consumes when executed
    pub fn gas_used(&self) -> u64 {
        gas_limits::TRANSFER
    }

    /// Fee charged to the sender for `gas_used`
    pub fn fee(&self) -> StateResult<Amount> {
        self.gas_used()
            .checked_mul(self.gas_price)
            .ok_or_else(|| StateError::InvalidTransaction("fee overflow".to_string()))
    }

    /// Stateless checks
    pub fn validate(&self) -> StateResult<()> {
        if self.from.is_empty() || self.to.is_empty() {
            return Err(StateError::InvalidTransaction("empty address".to_string()));
        }
        if self.from == self.to {
            return Err(StateError::InvalidTransaction("sender equals recipient".to_string()));
        }
        if self.gas_limit < self.gas_used() {
            return Err(StateError::InvalidTransaction(format!(
                "gas limit {} below required {}",
                self.gas_limit,
                self.gas_used()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_self_transfer() {
        let tx = Transaction::transfer("aa", "aa", 1, 0);
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_low_gas_limit() {
        let mut tx = Transaction::transfer("aa", "bb", 1, 0);
        tx.gas_limit = 100;
        assert!(matches!(tx.validate(), Err(StateError::InvalidTransaction(_))));
    }

    #[test]
    fn test_hash_depends_on_nonce() {
        let a = Transaction::transfer("aa", "bb", 1, 0);
        let b = Transaction::transfer("aa", "bb", 1, 1);
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_fee() {
        let mut tx = Transaction::transfer("aa", "bb", 1, 0);
        tx.gas_price = 3;
        assert_eq!(tx.fee().unwrap(), 3 * gas_limits::TRANSFER);
    }
}
