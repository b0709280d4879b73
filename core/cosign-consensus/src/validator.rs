//! Multi-signature check and reward execution for sealed blocks

use std::sync::Arc;

use cosign_state::{Amount, Block, StateSnapshot};
use tracing::warn;

use crate::errors::ConsensusError;
use crate::reward::{RewardCalculator, RewardDistribution};
use crate::schnorr::{combine_points, hash_message, verify, PublicKey};
use crate::types::{min_member, MultiSignature, ProducerSource};
use crate::ConsensusResult;

pub struct BlockMultiSigValidator {
    producers: Arc<dyn ProducerSource>,
}

impl BlockMultiSigValidator {
    pub fn new(producers: Arc<dyn ProducerSource>) -> Self {
        Self { producers }
    }

    /// Verify the block's aggregate signature against the producers whose
    /// bits are set
    pub fn verify_body(&self, block: &Block) -> ConsensusResult<MultiSignature> {
        let height = block.height();
        let multi_sig = MultiSignature::from_proof(&block.proof)?;
        let producers = self.producers.producers_at(height)?;

        if multi_sig.bitmap.len() != producers.len() {
            return Err(ConsensusError::BitmapLength {
                expected: producers.len(),
                actual: multi_sig.bitmap.len(),
            });
        }
        if !multi_sig.bitmap.is_marked(multi_sig.leader) {
            return Err(ConsensusError::MultiSig(format!(
                "leader {} missing from bitmap",
                multi_sig.leader
            )));
        }

        let participants = multi_sig.bitmap.count();
        let required = min_member(producers.len());
        if participants < required {
            return Err(ConsensusError::InsufficientParticipants {
                actual: participants,
                required,
            });
        }

        let keys: Vec<PublicKey> = multi_sig
            .bitmap
            .indices()
            .filter_map(|i| producers.get(i).map(|p| p.pubkey))
            .collect();
        let message = hash_message(&block.as_sign_message()?);
        if !verify(&combine_points(&keys), &message, &multi_sig.sig) {
            warn!(height, participants, "block multi-signature invalid");
            return Err(ConsensusError::SignatureNotValid);
        }
        Ok(multi_sig)
    }

    /// Credit the block's rewards on `snapshot`
    pub fn execute_block(
        &self,
        block: &Block,
        snapshot: &mut StateSnapshot,
        gas_fee: Amount,
    ) -> ConsensusResult<RewardDistribution> {
        let multi_sig = MultiSignature::from_proof(&block.proof)?;
        let producers = self.producers.producers_at(block.height())?;
        RewardCalculator::new(&multi_sig, &producers, gas_fee, block.height()).accumulate_rewards(snapshot)
    }
}
