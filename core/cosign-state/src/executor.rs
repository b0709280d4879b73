//! Transaction execution against a snapshot

use tracing::debug;

use crate::state_db::StateSnapshot;
use crate::transaction::Transaction;
use crate::{Amount, StateError, StateResult};

/// Result of executing a block's transactions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub gas_used: u64,
    /// Sum of fees paid by senders, owed to the block's leader
    pub gas_fee: Amount,
}

impl ExecutionOutcome {
    fn add(&mut self, gas: u64, fee: Amount) -> StateResult<()> {
        self.gas_used = self
            .gas_used
            .checked_add(gas)
            .ok_or_else(|| StateError::InvalidBlock("gas overflow".to_string()))?;
        self.gas_fee = self
            .gas_fee
            .checked_add(fee)
            .ok_or_else(|| StateError::InvalidBlock("fee overflow".to_string()))?;
        Ok(())
    }
}

/// Execute every transaction in order; any failure rejects the whole batch
pub fn execute_transactions(
    snapshot: &mut StateSnapshot,
    transactions: &[Transaction],
) -> StateResult<ExecutionOutcome> {
    let mut outcome = ExecutionOutcome::default();
    for tx in transactions {
        let (gas, fee) = snapshot.apply_transaction(tx)?;
        outcome.add(gas, fee)?;
    }
    Ok(outcome)
}

/// Greedily pick transactions that execute cleanly within `gas_limit`.
///
/// Transactions that fail are skipped and leave no trace in the snapshot.
pub fn select_transactions(
    snapshot: &mut StateSnapshot,
    candidates: impl IntoIterator<Item = Transaction>,
    gas_limit: u64,
) -> StateResult<(Vec<Transaction>, ExecutionOutcome)> {
    let mut selected = Vec::new();
    let mut outcome = ExecutionOutcome::default();

    for tx in candidates {
        if outcome.gas_used.saturating_add(tx.gas_used()) > gas_limit {
            break;
        }
        match snapshot.apply_transaction(&tx) {
            Ok((gas, fee)) => {
                outcome.add(gas, fee)?;
                selected.push(tx);
            }
            Err(e) => debug!(from = %tx.from, nonce = tx.nonce, error = %e, "skipping transaction"),
        }
    }

    Ok((selected, outcome))
}
