//! Account management and state

use serde::{Deserialize, Serialize};

use crate::{Address, Amount, StateError, StateResult};

/// Account in the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: Amount,
    pub nonce: u64,
}

impl Account {
    pub fn new(address: impl Into<Address>, balance: Amount) -> Self {
        Self {
            address: address.into(),
            balance,
            nonce: 0,
        }
    }

    /// Add `amount` to the balance
    pub fn credit(&mut self, amount: Amount) -> StateResult<()> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| StateError::BalanceOverflow(self.address.clone()))?;
        Ok(())
    }

    /// Remove `amount` from the balance
    pub fn debit(&mut self, amount: Amount) -> StateResult<()> {
        if self.balance < amount {
            return Err(StateError::InsufficientBalance {
                have: self.balance,
                need: amount,
            });
        }
        self.balance -= amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_and_debit() {
        let mut account = Account::new("aa", 100);
        account.credit(50).unwrap();
        assert_eq!(account.balance, 150);

        account.debit(120).unwrap();
        assert_eq!(account.balance, 30);
    }

    #[test]
    fn test_debit_insufficient() {
        let mut account = Account::new("aa", 10);
        let err = account.debit(11).unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { have: 10, need: 11 }));
        assert_eq!(account.balance, 10);
    }

    #[test]
    fn test_credit_overflow() {
        let mut account = Account::new("aa", u64::MAX);
        assert!(matches!(account.credit(1), Err(StateError::BalanceOverflow(_))));
    }
}
