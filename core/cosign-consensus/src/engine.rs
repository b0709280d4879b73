//! Round driver.
//!
//! Picks the leader for the next height from the online producers, runs the
//! proposal round and the confirmation round in the right role, and returns
//! the sealed block. Any failure abandons the height; the caller retries on
//! its next tick.

use std::collections::HashSet;
use std::sync::Arc;

use cosign_state::{Block, StateSnapshot};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chain::{BlockGenerator, ChainService};
use crate::config::{BftConfig, ConsensusMode};
use crate::errors::ConsensusError;
use crate::leader::Leader;
use crate::member::Member;
use crate::message::ConsensusMessage;
use crate::network::{Inbound, MessageQueue, PeerEvent, Sender};
use crate::reward::RewardCalculator;
use crate::round::Round;
use crate::schnorr::{self, hash_message, PrivateKey, PublicKey};
use crate::types::{account_address, min_member, Bitmap, CompletedBlockMessage, MemberInfo, MultiSignature, PeerId, ProducerSet};
use crate::validator::BlockMultiSigValidator;
use crate::ConsensusResult;

/// This node's part in the next height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Member,
}

pub struct BftConsensus {
    config: BftConfig,
    key: PrivateKey,
    pubkey: PublicKey,
    producers: ProducerSet,
    chain: Arc<dyn ChainService>,
    generator: Arc<dyn BlockGenerator>,
    sender: Arc<dyn Sender>,
    validator: Arc<BlockMultiSigValidator>,
    online_peers: RwLock<HashSet<PeerId>>,
    member_queue: MessageQueue,
    leader_queue: MessageQueue,
    /// Held for the duration of a height attempt
    running: Mutex<()>,
}

impl BftConsensus {
    pub fn new(
        config: BftConfig,
        key: PrivateKey,
        chain: Arc<dyn ChainService>,
        generator: Arc<dyn BlockGenerator>,
        sender: Arc<dyn Sender>,
    ) -> ConsensusResult<Self> {
        config.validate()?;
        let producers = config.producer_set();
        let pubkey = key.public_key();
        if producers.index_of(&pubkey).is_none() {
            return Err(ConsensusError::NotProducer);
        }

        Ok(Self {
            validator: Arc::new(BlockMultiSigValidator::new(Arc::new(producers.clone()))),
            member_queue: MessageQueue::new(config.msg_pool_size),
            leader_queue: MessageQueue::new(config.msg_pool_size),
            config,
            key,
            pubkey,
            producers,
            chain,
            generator,
            sender,
            online_peers: RwLock::new(HashSet::new()),
            running: Mutex::new(()),
        })
    }

    pub fn public_key(&self) -> PublicKey {
        self.pubkey
    }

    pub fn producers(&self) -> &ProducerSet {
        &self.producers
    }

    pub fn validator(&self) -> Arc<BlockMultiSigValidator> {
        self.validator.clone()
    }

    /// Track peer liveness
    pub fn apply_peer_event(&self, event: PeerEvent) {
        let mut online = self.online_peers.write();
        match event {
            PeerEvent::Connected(peer) => {
                debug!(peer = %peer, "peer connected");
                online.insert(peer);
            }
            PeerEvent::Disconnected(peer) => {
                debug!(peer = %peer, "peer disconnected");
                online.remove(&peer);
            }
        }
    }

    /// Decode an inbound message and queue it for the role that handles it
    pub fn receive_msg(&self, peer: &PeerId, code: u64, payload: &[u8]) -> ConsensusResult<()> {
        if self.producers.index_of_peer(peer).is_none() {
            debug!(peer = %peer, code, "message from non-producer dropped");
            return Ok(());
        }

        let message = ConsensusMessage::decode(code, payload)?;
        let (queue, role) = if message.is_for_member() {
            (&self.member_queue, "member")
        } else {
            (&self.leader_queue, "leader")
        };
        let height = message.height();
        if !queue.offer(Inbound {
            peer: peer.clone(),
            message,
        }) {
            warn!(peer = %peer, code, height, role, "message pool full, message dropped");
        }
        Ok(())
    }

    /// Producer list annotated with liveness for this round
    pub fn collect_member_status(&self) -> Vec<MemberInfo> {
        let online = self.online_peers.read();
        self.producers
            .iter()
            .enumerate()
            .map(|(index, producer)| {
                let is_me = producer.pubkey == self.pubkey;
                MemberInfo {
                    producer: producer.clone(),
                    index,
                    is_me,
                    is_online: is_me || online.contains(&producer.node),
                    is_leader: false,
                }
            })
            .collect()
    }

    /// Flag the leader for `height` among online members and return our role
    pub fn move_to_next_miner(&self, members: &mut [MemberInfo], height: u64) -> ConsensusResult<Role> {
        if !members.iter().any(|m| m.is_me) {
            return Err(ConsensusError::NotProducer);
        }
        let online: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_online)
            .map(|(pos, _)| pos)
            .collect();
        if online.len() < 2 {
            return Err(ConsensusError::BftNotReady);
        }

        let leader = online[(height % online.len() as u64) as usize];
        for (pos, member) in members.iter_mut().enumerate() {
            member.is_leader = pos == leader;
        }
        if members[leader].is_me {
            Ok(Role::Leader)
        } else {
            Ok(Role::Member)
        }
    }

    /// Attempt the next height and return the sealed block
    pub async fn run(&self) -> ConsensusResult<Block> {
        let _running = self.running.lock().await;
        let height = self.chain.best_height() + 1;

        let result = self.run_height(height).await;
        match &result {
            Ok(block) => info!(
                height,
                hash = %hex::encode(block.hash()),
                txs = block.transactions.len(),
                "block sealed"
            ),
            Err(e) => warn!(height, error = %e, "height attempt failed"),
        }
        result
    }

    async fn run_height(&self, height: u64) -> ConsensusResult<Block> {
        if self.config.consensus_mode == ConsensusMode::Solo {
            return self.run_as_solo(height).await;
        }

        let mut members = self.collect_member_status();
        match self.move_to_next_miner(&mut members, height)? {
            Role::Leader => self.run_as_leader(members, height).await,
            Role::Member => self.run_as_member(members, height).await,
        }
    }

    fn my_index(&self) -> ConsensusResult<usize> {
        self.producers.index_of(&self.pubkey).ok_or(ConsensusError::NotProducer)
    }

    fn template(&self, height: u64) -> ConsensusResult<(Block, StateSnapshot, u64)> {
        let mut snapshot = self.chain.state_snapshot();
        let coinbase = account_address(&self.pubkey);
        let (block, gas_fee) = self.generator.generate_template(&mut snapshot, &coinbase)?;
        if block.height() != height {
            return Err(ConsensusError::Status(format!(
                "template at height {} while running {}",
                block.height(),
                height
            )));
        }
        Ok((block, snapshot, gas_fee))
    }

    async fn run_as_leader(&self, members: Vec<MemberInfo>, height: u64) -> ConsensusResult<Block> {
        let leader_index = self.my_index()?;
        let (mut block, mut snapshot, gas_fee) = self.template(height)?;

        let mut leader = Leader::new(
            self.key.clone(),
            self.sender.clone(),
            members,
            min_member(self.producers.len()),
            height,
            self.config.wait_time(),
            self.leader_queue.clone(),
        )?;

        let outcome = leader.process_consensus(&block, Round::Proposal).await?;
        let multi_sig = MultiSignature::new(outcome.signature, leader_index, outcome.bitmap);
        block.proof = multi_sig.to_proof()?;
        RewardCalculator::new(&multi_sig, &self.producers, gas_fee, height).accumulate_rewards(&mut snapshot)?;
        block.header.state_root = snapshot.state_root();

        leader.reset();
        let completed = CompletedBlockMessage {
            multi_sig,
            state_root: block.header.state_root,
        };
        leader.process_consensus(&completed, Round::Confirmation).await?;
        Ok(block)
    }

    async fn run_as_member(&self, members: Vec<MemberInfo>, height: u64) -> ConsensusResult<Block> {
        let leader_index = members
            .iter()
            .position(|m| m.is_leader)
            .ok_or(ConsensusError::LeaderMistake)?;
        let leader_address = members[leader_index].producer.address();

        let mut member = Member::new(
            self.key.clone(),
            self.sender.clone(),
            &members,
            height,
            self.config.wait_time(),
            self.member_queue.clone(),
        )?
        .with_chain_height(self.chain.subscribe_height());

        let chain = self.chain.clone();
        let block: Block = member
            .process_consensus(
                Round::Proposal,
                Box::new(|bytes: &[u8]| Block::decode(bytes).map_err(ConsensusError::from)),
                Box::new(move |block: &Block| verify_proposal(chain.as_ref(), block, height, &leader_address)),
            )
            .await?;

        member.reset();
        let chain = self.chain.clone();
        let validator = self.validator.clone();
        let proposal = block.clone();
        let completed: CompletedBlockMessage = member
            .process_consensus(
                Round::Confirmation,
                Box::new(|bytes: &[u8]| CompletedBlockMessage::decode(bytes)),
                Box::new(move |msg: &CompletedBlockMessage| {
                    verify_completed(chain.as_ref(), &validator, &proposal, leader_index, msg)
                }),
            )
            .await?;

        let mut block = block;
        block.header.state_root = completed.state_root;
        block.proof = completed.multi_sig.to_proof()?;
        Ok(block)
    }

    /// Single producer: sign alone with a one-entry bitmap
    async fn run_as_solo(&self, height: u64) -> ConsensusResult<Block> {
        let my_index = self.my_index()?;
        let (mut block, mut snapshot, gas_fee) = self.template(height)?;

        let message = hash_message(&block.as_sign_message()?);
        let sig = schnorr::sign(&self.key, &message)?;
        let mut bitmap = Bitmap::new(self.producers.len());
        bitmap.mark(my_index);

        let multi_sig = MultiSignature::new(sig, my_index, bitmap);
        block.proof = multi_sig.to_proof()?;
        RewardCalculator::new(&multi_sig, &self.producers, gas_fee, height).accumulate_rewards(&mut snapshot)?;
        block.header.state_root = snapshot.state_root();
        Ok(block)
    }
}

/// Round-1 member check: the proposal extends our tip and re-executes to the
/// gas it claims
fn verify_proposal(chain: &dyn ChainService, block: &Block, height: u64, leader_address: &str) -> ConsensusResult<()> {
    if block.height() != height {
        return Err(ConsensusError::Status(format!(
            "proposal height {} while running {}",
            block.height(),
            height
        )));
    }
    if block.header.previous_hash != chain.best_hash() {
        return Err(ConsensusError::Status("proposal does not extend the local tip".to_string()));
    }
    if block.header.coinbase != leader_address {
        return Err(ConsensusError::LeaderMistake);
    }
    block.validate()?;

    let mut snapshot = chain.state_snapshot();
    let outcome = chain.execute_block(block, &mut snapshot)?;
    if outcome.gas_used != block.header.gas_used {
        return Err(ConsensusError::GasUsed {
            expected: block.header.gas_used,
            actual: outcome.gas_used,
        });
    }
    Ok(())
}

/// Round-2 member check: the multi-signature is valid and executing the
/// block plus rewards lands on the announced root
fn verify_completed(
    chain: &dyn ChainService,
    validator: &BlockMultiSigValidator,
    proposal: &Block,
    leader_index: usize,
    msg: &CompletedBlockMessage,
) -> ConsensusResult<()> {
    if msg.multi_sig.leader != leader_index {
        return Err(ConsensusError::MultiSig(format!(
            "leader index {} while expecting {}",
            msg.multi_sig.leader, leader_index
        )));
    }

    let mut block = proposal.clone();
    block.header.state_root = msg.state_root;
    block.proof = msg.multi_sig.to_proof()?;
    validator.verify_body(&block)?;

    let mut snapshot = chain.state_snapshot();
    let outcome = chain.execute_block(&block, &mut snapshot)?;
    if outcome.gas_used != block.header.gas_used {
        return Err(ConsensusError::GasUsed {
            expected: block.header.gas_used,
            actual: outcome.gas_used,
        });
    }
    validator.execute_block(&block, &mut snapshot, outcome.gas_fee)?;

    let root = snapshot.state_root();
    if root != msg.state_root {
        return Err(ConsensusError::StateRootMismatch {
            expected: hex::encode(msg.state_root),
            actual: hex::encode(root),
        });
    }
    Ok(())
}
