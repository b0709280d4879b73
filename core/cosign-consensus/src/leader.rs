//! Round coordinator.
//!
//! The leader ships the payload in a Setup, gathers nonce commitments, sends
//! every committed member a challenge built from everybody else's keys and
//! commitments, folds the partial signatures into one aggregate and checks it
//! against the combined key of the responders.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::errors::ConsensusError;
use crate::message::{Challenge, Commitment, ConsensusMessage, Fail, Response, Setup};
use crate::metrics;
use crate::network::{send_message, Inbound, MessageQueue, Sender};
use crate::round::{CancelSignal, Round, RoundState, StateCell};
use crate::schnorr::{
    combine_points, combine_sigs, generate_commitment, hash_message, partial_sign, verify, Nonce, Point,
    PrivateKey, PublicKey, Signature,
};
use crate::types::{Bitmap, ConsensusPayload, MemberInfo, PeerId, ProducerSet};
use crate::ConsensusResult;

/// Aggregate signature and the producers that contributed to it
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub signature: Signature,
    pub bitmap: Bitmap,
}

struct LeaderContext {
    key: PrivateKey,
    pubkey: PublicKey,
    sender: Arc<dyn Sender>,
    members: Vec<MemberInfo>,
    producers: ProducerSet,
    my_index: usize,
    height: u64,
    min_member: usize,
    wait_time: Duration,
}

impl LeaderContext {
    /// Online producers other than this node
    fn live_members(&self) -> impl Iterator<Item = &MemberInfo> {
        self.members.iter().filter(|m| m.is_online && !m.is_me)
    }

    fn online_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_online).count()
    }

    /// Commit wait ends at quorum, or once no online producer is left to commit
    fn commits_settled(&self, count: usize) -> bool {
        count >= self.min_member || count >= self.online_count()
    }
}

struct Aggregate {
    commit_bitmap: Bitmap,
    response_bitmap: Bitmap,
    /// Producer indices in commit order, parallel to the two lists below
    committed: Vec<usize>,
    sigma_pub_keys: Vec<PublicKey>,
    sigma_commitments: Vec<Point>,
    msg_hash: [u8; 32],
    nonce: Option<Nonce>,
    sigma_s: Option<Signature>,
}

impl Aggregate {
    fn new(len: usize) -> Self {
        Self {
            commit_bitmap: Bitmap::new(len),
            response_bitmap: Bitmap::new(len),
            committed: Vec::new(),
            sigma_pub_keys: Vec::new(),
            sigma_commitments: Vec::new(),
            msg_hash: [0u8; 32],
            nonce: None,
            sigma_s: None,
        }
    }

    fn responses_complete(&self) -> bool {
        self.response_bitmap.count() == self.committed.len()
    }
}

fn combine_except(points: &[Point], skip: usize) -> Point {
    let others: Vec<Point> = points
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != skip)
        .map(|(_, p)| *p)
        .collect();
    combine_points(&others)
}

struct LeaderRound {
    ctx: Arc<LeaderContext>,
    round: Round,
    state: StateCell,
    agg: Mutex<Aggregate>,
    commit_done: CancelSignal,
    response_done: CancelSignal,
}

impl LeaderRound {
    fn new(ctx: Arc<LeaderContext>, round: Round) -> Self {
        let len = ctx.producers.len();
        Self {
            ctx,
            round,
            state: StateCell::new(),
            agg: Mutex::new(Aggregate::new(len)),
            commit_done: CancelSignal::new(),
            response_done: CancelSignal::new(),
        }
    }

    async fn run(&self, msg: &dyn ConsensusPayload) -> ConsensusResult<RoundOutcome> {
        let sign_message = msg.as_sign_message()?;
        let payload = msg.as_message()?;

        if let Err(e) = self.set_up(&sign_message, payload) {
            self.fail(&e);
            return Err(e);
        }

        if !self.wait_for_commit().await {
            let err = ConsensusError::WaitCommit;
            self.fail(&err);
            return Err(err);
        }

        if let Err(e) = self.challenge() {
            self.fail(&e);
            return Err(e);
        }

        if !self.wait_for_response().await {
            let err = ConsensusError::WaitResponse;
            self.fail(&err);
            return Err(err);
        }

        match self.validate() {
            Ok(outcome) => {
                self.state.set(RoundState::Completed);
                Ok(outcome)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn set_up(&self, sign_message: &[u8], payload: Vec<u8>) -> ConsensusResult<()> {
        let ctx = &self.ctx;
        let msg_hash = hash_message(sign_message);
        let (nonce, q) =
            generate_commitment(&ctx.key, &msg_hash).map_err(|_| ConsensusError::GenerateNonce)?;

        {
            let mut agg = self.agg.lock();
            agg.msg_hash = msg_hash;
            agg.nonce = Some(nonce);
            agg.commit_bitmap.mark(ctx.my_index);
            agg.committed.push(ctx.my_index);
            agg.sigma_pub_keys.push(ctx.pubkey);
            agg.sigma_commitments.push(q);
            self.state.set(RoundState::WaitCommit);
            if ctx.commits_settled(agg.commit_bitmap.count()) {
                self.commit_done.fire();
            }
        }

        let setup = ConsensusMessage::Setup(Setup::new(ctx.height, self.round, payload));
        for member in ctx.live_members() {
            send_message(&ctx.sender, member.peer(), &setup);
        }
        debug!(height = ctx.height, round = %self.round, "setup sent");
        Ok(())
    }

    /// Succeeds as soon as `min_member` producers committed; otherwise fails
    /// on timeout or once every online producer committed short of quorum
    async fn wait_for_commit(&self) -> bool {
        tokio::select! {
            _ = self.commit_done.fired() => {}
            _ = tokio::time::sleep(self.ctx.wait_time) => {}
        }

        let agg = self.agg.lock();
        let count = agg.commit_bitmap.count();
        if count >= self.ctx.min_member {
            self.state.set(RoundState::WaitCommitCompleted);
            true
        } else {
            self.state.set(RoundState::WaitCommitTimeout);
            warn!(
                height = self.ctx.height,
                round = %self.round,
                commits = count,
                required = self.ctx.min_member,
                "not enough commitments"
            );
            false
        }
    }

    fn on_commit(&self, peer: &PeerId, commitment: &Commitment) {
        let ctx = &self.ctx;
        let mut agg = self.agg.lock();

        let state = self.state.get();
        if state != RoundState::WaitCommit {
            debug!(peer = %peer, ?state, "commitment outside WAIT_COMMIT dropped");
            metrics::record_commit(false);
            return;
        }
        if commitment.height != ctx.height {
            debug!(peer = %peer, height = commitment.height, local = ctx.height, "commitment height mismatch");
            metrics::record_commit(false);
            return;
        }
        let index = match ctx.producers.index_of_peer(peer) {
            Some(index) if index != ctx.my_index => index,
            _ => {
                debug!(peer = %peer, "commitment from unknown peer");
                metrics::record_commit(false);
                return;
            }
        };
        if ctx.producers.get(index).map(|p| p.pubkey) != Some(commitment.bp_key) {
            debug!(peer = %peer, "commitment key does not match producer");
            metrics::record_commit(false);
            return;
        }
        if !agg.commit_bitmap.mark(index) {
            debug!(peer = %peer, "duplicate commitment");
            metrics::record_commit(false);
            return;
        }

        agg.committed.push(index);
        agg.sigma_pub_keys.push(commitment.bp_key);
        agg.sigma_commitments.push(commitment.q);
        metrics::record_commit(true);
        debug!(peer = %peer, index, commits = agg.committed.len(), "commitment accepted");

        if ctx.commits_settled(agg.commit_bitmap.count()) {
            self.commit_done.fire();
        }
    }

    /// Sign the leader's own share, then send each committed member its
    /// personalised challenge
    fn challenge(&self) -> ConsensusResult<()> {
        let ctx = &self.ctx;
        let mut outgoing = Vec::new();
        {
            let mut agg = self.agg.lock();
            let my_pos = agg
                .committed
                .iter()
                .position(|i| *i == ctx.my_index)
                .ok_or(ConsensusError::Status("leader missing from commit set".to_string()))?;

            let nonce = agg.nonce.take().ok_or(ConsensusError::GenerateNonce)?;
            let others_q = combine_except(&agg.sigma_commitments, my_pos);
            let own = partial_sign(&ctx.key, nonce, &agg.msg_hash, &others_q);
            agg.sigma_s = Some(own);
            agg.response_bitmap.mark(ctx.my_index);
            self.state.set(RoundState::WaitResponse);

            for (pos, index) in agg.committed.iter().enumerate() {
                if *index == ctx.my_index {
                    continue;
                }
                let Some(producer) = ctx.producers.get(*index) else {
                    continue;
                };
                let challenge = Challenge::new(
                    ctx.height,
                    self.round,
                    combine_except(&agg.sigma_pub_keys, pos),
                    combine_except(&agg.sigma_commitments, pos),
                    agg.msg_hash,
                );
                outgoing.push((producer.node.clone(), ConsensusMessage::Challenge(challenge)));
            }

            if agg.responses_complete() {
                self.response_done.fire();
            }
        }

        for (peer, message) in &outgoing {
            send_message(&ctx.sender, peer, message);
        }
        debug!(height = ctx.height, round = %self.round, challenges = outgoing.len(), "challenges sent");
        Ok(())
    }

    /// Every committed producer must respond
    async fn wait_for_response(&self) -> bool {
        tokio::select! {
            _ = self.response_done.fired() => {}
            _ = tokio::time::sleep(self.ctx.wait_time) => {}
        }

        let agg = self.agg.lock();
        if agg.responses_complete() {
            self.state.set(RoundState::WaitResponseCompleted);
            true
        } else {
            self.state.set(RoundState::WaitResponseTimeout);
            warn!(
                height = self.ctx.height,
                round = %self.round,
                responses = agg.response_bitmap.count(),
                committed = agg.committed.len(),
                "not every committed member responded"
            );
            false
        }
    }

    fn on_response(&self, peer: &PeerId, response: &Response) {
        let ctx = &self.ctx;
        let mut agg = self.agg.lock();

        let state = self.state.get();
        if state != RoundState::WaitResponse {
            debug!(peer = %peer, ?state, "response outside WAIT_RESPONSE dropped");
            metrics::record_response(false);
            return;
        }
        if response.height != ctx.height {
            debug!(peer = %peer, height = response.height, local = ctx.height, "response height mismatch");
            metrics::record_response(false);
            return;
        }
        let Some(index) = ctx.producers.index_of_peer(peer) else {
            debug!(peer = %peer, "response from unknown peer");
            metrics::record_response(false);
            return;
        };
        if ctx.producers.get(index).map(|p| p.pubkey) != Some(response.bp_key)
            || !agg.commit_bitmap.is_marked(index)
            || agg.response_bitmap.is_marked(index)
        {
            debug!(peer = %peer, index, "response from uncommitted or repeated producer");
            metrics::record_response(false);
            return;
        }

        let Some(current) = agg.sigma_s else {
            return;
        };
        match combine_sigs(&[current, response.s]) {
            Ok(combined) => {
                agg.sigma_s = Some(combined);
                agg.response_bitmap.mark(index);
                metrics::record_response(true);
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "partial signature rejected");
                metrics::record_response(false);
                return;
            }
        }

        if agg.responses_complete() {
            self.response_done.fire();
        }
    }

    /// Check the aggregate against exactly the responders' combined key
    fn validate(&self) -> ConsensusResult<RoundOutcome> {
        let agg = self.agg.lock();
        let signature = agg.sigma_s.ok_or(ConsensusError::SignatureNotValid)?;

        let keys: Vec<PublicKey> = agg
            .response_bitmap
            .indices()
            .filter_map(|i| self.ctx.producers.get(i).map(|p| p.pubkey))
            .collect();
        if !verify(&combine_points(&keys), &agg.msg_hash, &signature) {
            warn!(height = self.ctx.height, round = %self.round, "aggregate signature invalid");
            return Err(ConsensusError::SignatureNotValid);
        }

        Ok(RoundOutcome {
            signature,
            bitmap: agg.response_bitmap.clone(),
        })
    }

    /// Abort waits and tell live members to give up
    fn fail(&self, reason: &ConsensusError) {
        self.state.set(RoundState::Error);
        self.commit_done.fire();
        self.response_done.fire();

        let fail = ConsensusMessage::Fail(Fail::new(self.ctx.height, self.round, reason.to_string()));
        for member in self.ctx.live_members() {
            send_message(&self.ctx.sender, member.peer(), &fail);
        }
        warn!(height = self.ctx.height, round = %self.round, reason = %reason, "leader round failed");
    }
}

async fn process_p2p_message(
    round: Arc<LeaderRound>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Inbound>>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut queue = queue.lock().await;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            inbound = queue.recv() => {
                let Some(Inbound { peer, message }) = inbound else {
                    break;
                };
                if message.round() != round.round {
                    debug!(peer = %peer, round = %message.round(), "message for another round dropped");
                    continue;
                }
                match message {
                    ConsensusMessage::Commitment(commitment) => round.on_commit(&peer, &commitment),
                    ConsensusMessage::Response(response) => round.on_response(&peer, &response),
                    other => debug!(peer = %peer, code = other.code(), "leader ignores message"),
                }
            }
        }
    }
}

/// Leader role for one height
pub struct Leader {
    ctx: Arc<LeaderContext>,
    queue: MessageQueue,
    current: Option<Arc<LeaderRound>>,
}

impl Leader {
    /// `members` lists every producer in producer-set order
    pub fn new(
        key: PrivateKey,
        sender: Arc<dyn Sender>,
        members: Vec<MemberInfo>,
        min_member: usize,
        height: u64,
        wait_time: Duration,
        queue: MessageQueue,
    ) -> ConsensusResult<Self> {
        let my_index = members
            .iter()
            .find(|m| m.is_me)
            .map(|m| m.index)
            .ok_or(ConsensusError::NotProducer)?;
        let producers = ProducerSet::new(members.iter().map(|m| m.producer.clone()).collect());

        Ok(Self {
            ctx: Arc::new(LeaderContext {
                pubkey: key.public_key(),
                key,
                sender,
                members,
                producers,
                my_index,
                height,
                min_member,
                wait_time,
            }),
            queue,
            current: None,
        })
    }

    pub fn state(&self) -> RoundState {
        self.current
            .as_ref()
            .map(|round| round.state.get())
            .unwrap_or(RoundState::Init)
    }

    /// Drop the finished round; the next call starts from clean bitmaps
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Run one round over `msg`
    pub async fn process_consensus(
        &mut self,
        msg: &dyn ConsensusPayload,
        round: Round,
    ) -> ConsensusResult<RoundOutcome> {
        let started = Instant::now();
        let state = Arc::new(LeaderRound::new(self.ctx.clone(), round));
        self.current = Some(state.clone());

        let stale = self.queue.discard_pending();
        if stale > 0 {
            debug!(height = self.ctx.height, round = %round, stale, "discarded messages from an earlier attempt");
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(process_p2p_message(state.clone(), self.queue.receiver(), stop_rx));

        let result = state.run(msg).await;

        let _ = stop_tx.send(());
        let _ = dispatcher.await;

        metrics::record_round("leader", result.is_ok(), started.elapsed().as_secs_f64());
        if let Ok(outcome) = &result {
            info!(
                height = self.ctx.height,
                round = %round,
                participants = outcome.bitmap.count(),
                "leader round completed"
            );
        }
        result
    }
}
