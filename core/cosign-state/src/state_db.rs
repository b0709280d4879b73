//! In-memory state database
//!
//! `StateDB` holds the committed ledger. Block production and validation work
//! on a cloned [`StateSnapshot`] and only a fully verified snapshot is
//! committed back, so a rejected block never touches committed state.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use sha3::{Digest, Sha3_256};
use tracing::debug;

use crate::transaction::Transaction;
use crate::{Account, Address, Amount, BalanceStore, Hash, StateError, StateResult};

/// Mutable working copy of the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    accounts: BTreeMap<Address, Account>,
    /// Credits already applied, keyed by recipient and block height
    credits: BTreeMap<(Address, u64), Amount>,
}

impl StateSnapshot {
    pub fn with_accounts(alloc: impl IntoIterator<Item = (Address, Amount)>) -> Self {
        let accounts = alloc
            .into_iter()
            .map(|(address, balance)| (address.clone(), Account::new(address, balance)))
            .collect();
        Self {
            accounts,
            credits: BTreeMap::new(),
        }
    }

    pub fn account(&self, address: &str) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn nonce(&self, address: &str) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    /// Amount credited to `address` at `height`, if any
    pub fn credit_at(&self, address: &str, height: u64) -> Option<Amount> {
        self.credits.get(&(address.to_string(), height)).copied()
    }

    fn account_mut(&mut self, address: &Address) -> &mut Account {
        self.accounts
            .entry(address.clone())
            .or_insert_with(|| Account::new(address.clone(), 0))
    }

    /// Apply a transfer, returning `(gas_used, fee)`.
    ///
    /// All checks run before any mutation so a failed transaction leaves the
    /// snapshot untouched.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> StateResult<(u64, Amount)> {
        tx.validate()?;
        let fee = tx.fee()?;
        let total = tx
            .amount
            .checked_add(fee)
            .ok_or_else(|| StateError::InvalidTransaction("amount overflow".to_string()))?;

        let sender = self
            .accounts
            .get(&tx.from)
            .ok_or_else(|| StateError::AccountNotFound(tx.from.clone()))?;
        if sender.nonce != tx.nonce {
            return Err(StateError::InvalidNonce {
                address: tx.from.clone(),
                expected: sender.nonce,
                got: tx.nonce,
            });
        }
        if sender.balance < total {
            return Err(StateError::InsufficientBalance {
                have: sender.balance,
                need: total,
            });
        }
        let recipient_balance = self.accounts.get(&tx.to).map(|a| a.balance).unwrap_or(0);
        if recipient_balance.checked_add(tx.amount).is_none() {
            return Err(StateError::BalanceOverflow(tx.to.clone()));
        }

        let sender = self.account_mut(&tx.from);
        sender.debit(total)?;
        sender.nonce += 1;
        self.account_mut(&tx.to).credit(tx.amount)?;

        Ok((tx.gas_used(), fee))
    }

    /// Deterministic root over accounts and the credit journal
    pub fn state_root(&self) -> Hash {
        let mut hasher = Sha3_256::new();
        for (address, account) in &self.accounts {
            hasher.update((address.len() as u64).to_le_bytes());
            hasher.update(address.as_bytes());
            hasher.update(account.balance.to_le_bytes());
            hasher.update(account.nonce.to_le_bytes());
        }
        hasher.update(b"credits");
        for ((address, height), amount) in &self.credits {
            hasher.update((address.len() as u64).to_le_bytes());
            hasher.update(address.as_bytes());
            hasher.update(height.to_le_bytes());
            hasher.update(amount.to_le_bytes());
        }

        let mut root = [0u8; 32];
        root.copy_from_slice(&hasher.finalize());
        root
    }
}

impl BalanceStore for StateSnapshot {
    fn add_balance(&mut self, address: &Address, height: u64, amount: Amount) -> StateResult<()> {
        let key = (address.clone(), height);
        if let Some(&recorded) = self.credits.get(&key) {
            if recorded == amount {
                debug!(address = %address, height, amount, "credit already applied");
                return Ok(());
            }
            return Err(StateError::ConflictingCredit {
                address: address.clone(),
                height,
                recorded,
                requested: amount,
            });
        }

        self.account_mut(address).credit(amount)?;
        self.credits.insert(key, amount);
        Ok(())
    }

    fn balance(&self, address: &Address) -> Amount {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }
}

/// Committed ledger state
pub struct StateDB {
    committed: RwLock<StateSnapshot>,
}

impl StateDB {
    pub fn new(genesis: StateSnapshot) -> Self {
        Self {
            committed: RwLock::new(genesis),
        }
    }

    /// Working copy of the committed state
    pub fn snapshot(&self) -> StateSnapshot {
        self.committed.read().clone()
    }

    /// Replace committed state with a verified snapshot
    pub fn commit(&self, snapshot: StateSnapshot) {
        let root = snapshot.state_root();
        *self.committed.write() = snapshot;
        debug!(root = %hex::encode(root), "state committed");
    }

    pub fn balance(&self, address: &Address) -> Amount {
        self.committed.read().balance(address)
    }

    pub fn nonce(&self, address: &str) -> u64 {
        self.committed.read().nonce(address)
    }

    pub fn state_root(&self) -> Hash {
        self.committed.read().state_root()
    }
}
