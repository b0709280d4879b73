//! Block reward distribution.
//!
//! The leader takes half of the issuance plus the block's gas fees; the other
//! half is split evenly over the remaining participants in the bitmap.
//! Integer-division dust and the whole second half (when the leader signed
//! alone) go to the leader, so issuance is always fully paid out.

use cosign_state::{Address, Amount, BalanceStore, COIN};
use tracing::debug;

use crate::errors::ConsensusError;
use crate::metrics;
use crate::types::{MultiSignature, ProducerSet};
use crate::ConsensusResult;

/// Coins issued per block before halving
pub const BLOCK_REWARD_COINS: Amount = 100;

/// Blocks produced per year at the target interval
pub const BLOCKS_PER_YEAR: u64 = 2_102_400;

/// Issuance halves after this many blocks
pub const HALVING_INTERVAL: u64 = 4 * BLOCKS_PER_YEAR;

/// Issuance for a block at `height`
pub fn block_issuance(height: u64) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= u64::from(Amount::BITS) {
        return 0;
    }
    (BLOCK_REWARD_COINS * COIN) >> halvings
}

/// Credits computed for one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardDistribution {
    pub leader: (Address, Amount),
    pub participants: Vec<(Address, Amount)>,
}

impl RewardDistribution {
    pub fn total(&self) -> Amount {
        self.participants
            .iter()
            .fold(self.leader.1, |acc, (_, amount)| acc.saturating_add(*amount))
    }
}

pub struct RewardCalculator<'a> {
    sig: &'a MultiSignature,
    producers: &'a ProducerSet,
    total_gas_fee: Amount,
    height: u64,
}

impl<'a> RewardCalculator<'a> {
    pub fn new(sig: &'a MultiSignature, producers: &'a ProducerSet, total_gas_fee: Amount, height: u64) -> Self {
        Self {
            sig,
            producers,
            total_gas_fee,
            height,
        }
    }

    /// Work out who gets what without touching the ledger
    pub fn distribution(&self) -> ConsensusResult<RewardDistribution> {
        if self.sig.bitmap.len() != self.producers.len() {
            return Err(ConsensusError::BitmapLength {
                expected: self.producers.len(),
                actual: self.sig.bitmap.len(),
            });
        }
        let leader = self
            .producers
            .get(self.sig.leader)
            .ok_or_else(|| ConsensusError::MultiSig(format!("leader index {} out of range", self.sig.leader)))?;

        let participants: Vec<Address> = self
            .sig
            .bitmap
            .indices()
            .filter(|i| *i != self.sig.leader)
            .filter_map(|i| self.producers.get(i).map(|p| p.address()))
            .collect();

        let issuance = block_issuance(self.height);
        let shared = issuance / 2;
        let mut leader_reward = issuance - shared;

        let share = if participants.is_empty() {
            leader_reward += shared;
            0
        } else {
            let share = shared / participants.len() as Amount;
            leader_reward += shared - share * participants.len() as Amount;
            share
        };
        leader_reward = leader_reward
            .checked_add(self.total_gas_fee)
            .ok_or_else(|| ConsensusError::MultiSig("reward overflow".to_string()))?;

        Ok(RewardDistribution {
            leader: (leader.address(), leader_reward),
            participants: participants.into_iter().map(|addr| (addr, share)).collect(),
        })
    }

    /// Credit the distribution at this block's height
    pub fn accumulate_rewards(&self, store: &mut dyn BalanceStore) -> ConsensusResult<RewardDistribution> {
        let distribution = self.distribution()?;

        for (address, amount) in &distribution.participants {
            store.add_balance(address, self.height, *amount)?;
        }
        let (leader, amount) = &distribution.leader;
        store.add_balance(leader, self.height, *amount)?;

        metrics::record_reward(distribution.total());
        debug!(
            height = self.height,
            leader = %leader,
            leader_reward = amount,
            participants = distribution.participants.len(),
            "rewards credited"
        );
        Ok(distribution)
    }
}
