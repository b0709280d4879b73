//! Round participant.
//!
//! A member waits for the leader's Setup, validates the payload, commits to
//! a nonce, then answers the leader's challenge with a partial signature.
//! Any protocol violation by the leader surfaces as a typed error instead of
//! being silently skipped, since a member has no other leader to fall back to.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::errors::ConsensusError;
use crate::message::{Challenge, Commitment, ConsensusMessage, Fail, Response, Setup};
use crate::metrics;
use crate::network::{send_message, Inbound, MessageQueue, Sender};
use crate::round::{CancelSignal, Round, RoundState, StateCell};
use crate::schnorr::{generate_commitment, hash_message, partial_sign, Nonce, PrivateKey, PublicKey};
use crate::types::{ConsensusPayload, MemberInfo, PeerId};
use crate::ConsensusResult;

/// Decodes the Setup payload into the round's message type
pub type Convertor<M> = Box<dyn Fn(&[u8]) -> ConsensusResult<M> + Send + Sync>;

/// Domain check run before committing to a message
pub type Validator<M> = Box<dyn Fn(&M) -> ConsensusResult<()> + Send + Sync>;

struct MemberContext {
    key: PrivateKey,
    pubkey: PublicKey,
    sender: Arc<dyn Sender>,
    leader: MemberInfo,
    height: u64,
    wait_time: Duration,
}

struct Progress<M> {
    msg: Option<M>,
    msg_hash: Option<[u8; 32]>,
    nonce: Option<Nonce>,
}

struct MemberRound<M> {
    ctx: Arc<MemberContext>,
    round: Round,
    state: Arc<StateCell>,
    convertor: Convertor<M>,
    validator: Validator<M>,
    progress: Mutex<Progress<M>>,
    error_tx: mpsc::Sender<ConsensusError>,
    completed_tx: mpsc::Sender<()>,
    timeout_tx: mpsc::Sender<()>,
    cancel_wait_setup: CancelSignal,
    cancel_wait_challenge: CancelSignal,
    chain_height: Option<watch::Receiver<u64>>,
}

impl<M: ConsensusPayload + 'static> MemberRound<M> {
    fn push_error(&self, err: ConsensusError) {
        if self.state.get().is_finished() {
            return;
        }
        warn!(height = self.ctx.height, round = %self.round, error = %err, "member round aborted");
        self.state.set(RoundState::Error);
        self.cancel_wait_setup.fire();
        self.cancel_wait_challenge.fire();
        let _ = self.error_tx.try_send(err);
    }

    fn check_height(&self, received: u64) -> ConsensusResult<()> {
        let local = self.ctx.height;
        if received < local {
            Err(ConsensusError::LowHeight { local, received })
        } else if received > local {
            Err(ConsensusError::HighHeight { local, received })
        } else {
            Ok(())
        }
    }

    fn on_set_up(self: &Arc<Self>, peer: &PeerId, setup: &Setup) {
        if peer != self.ctx.leader.peer() {
            warn!(peer = %peer, leader = %self.ctx.leader.peer(), "setup from a producer that is not the leader");
            self.push_error(ConsensusError::LeaderMistake);
            return;
        }
        if let Err(e) = self.check_height(setup.height) {
            self.push_error(e);
            return;
        }
        let state = self.state.get();
        if state != RoundState::WaitSetup {
            debug!(?state, "setup outside WAIT_SETUP dropped");
            return;
        }

        let msg = match (self.convertor)(&setup.msg) {
            Ok(msg) => msg,
            Err(e) => {
                self.push_error(ConsensusError::ValidateMsg(Box::new(e)));
                return;
            }
        };
        let msg_hash = match msg.as_sign_message() {
            Ok(bytes) => hash_message(&bytes),
            Err(e) => {
                self.push_error(ConsensusError::ValidateMsg(Box::new(e)));
                return;
            }
        };

        if let Err(e) = self.commit(msg, msg_hash) {
            self.push_error(e);
        }
    }

    /// Validate, draw a nonce and send the commitment
    fn commit(self: &Arc<Self>, msg: M, msg_hash: [u8; 32]) -> ConsensusResult<()> {
        if let Err(e) = (self.validator)(&msg) {
            warn!(height = self.ctx.height, round = %self.round, error = %e, "member check msg fail");
            return Err(ConsensusError::ValidateMsg(Box::new(e)));
        }

        let (nonce, q) =
            generate_commitment(&self.ctx.key, &msg_hash).map_err(|_| ConsensusError::GenerateNonce)?;
        {
            let mut progress = self.progress.lock();
            progress.msg = Some(msg);
            progress.msg_hash = Some(msg_hash);
            progress.nonce = Some(nonce);
        }

        if !self.state.transition(RoundState::WaitSetup, RoundState::WaitChallenge) {
            debug!(state = ?self.state.get(), "round left WAIT_SETUP before commit");
            return Ok(());
        }

        let commitment = ConsensusMessage::Commitment(Commitment::new(self.ctx.height, self.round, self.ctx.pubkey, q));
        send_message(&self.ctx.sender, self.ctx.leader.peer(), &commitment);
        debug!(height = self.ctx.height, round = %self.round, "commitment sent to leader");

        tokio::spawn(wait_challenge(self.clone()));
        self.cancel_wait_setup.fire();
        Ok(())
    }

    fn on_challenge(&self, peer: &PeerId, challenge: &Challenge) {
        if peer != self.ctx.leader.peer() {
            warn!(peer = %peer, "challenge from a producer that is not the leader");
            self.push_error(ConsensusError::LeaderMistake);
            return;
        }
        if let Err(e) = self.check_height(challenge.height) {
            self.push_error(e);
            return;
        }
        let state = self.state.get();
        if state != RoundState::WaitChallenge {
            debug!(?state, "challenge outside WAIT_CHALLENGE dropped");
            return;
        }

        let signature = {
            let mut progress = self.progress.lock();
            if progress.msg_hash != Some(challenge.r) {
                drop(progress);
                self.push_error(ConsensusError::Challenge);
                return;
            }
            let Some(nonce) = progress.nonce.take() else {
                drop(progress);
                self.push_error(ConsensusError::GenerateNonce);
                return;
            };
            partial_sign(&self.ctx.key, nonce, &challenge.r, &challenge.sigma_q)
        };

        if !self.state.transition(RoundState::WaitChallenge, RoundState::Completed) {
            return;
        }
        let response = ConsensusMessage::Response(Response::new(self.ctx.height, self.round, self.ctx.pubkey, signature));
        send_message(&self.ctx.sender, self.ctx.leader.peer(), &response);
        debug!(height = self.ctx.height, round = %self.round, "response sent");

        self.cancel_wait_challenge.fire();
        let _ = self.completed_tx.try_send(());
    }

    /// Only a round that accepted a Setup can be failed; anything earlier is
    /// left over from a previous attempt at this height
    fn on_fail(&self, peer: &PeerId, fail: &Fail) {
        let state = self.state.get();
        if peer != self.ctx.leader.peer()
            || fail.height != self.ctx.height
            || state == RoundState::WaitSetup
            || state.is_finished()
        {
            debug!(peer = %peer, height = fail.height, ?state, "fail message ignored");
            return;
        }
        warn!(height = fail.height, reason = %fail.reason, "member received leader's fail message");
        self.push_error(ConsensusError::from_fail_reason(&fail.reason));
    }

    fn take_message(&self) -> ConsensusResult<M> {
        self.progress
            .lock()
            .msg
            .take()
            .ok_or_else(|| ConsensusError::Status("completed without a message".to_string()))
    }
}

/// Resolves once the chain's best height reaches `height`
async fn chain_reached(chain_height: Option<watch::Receiver<u64>>, height: u64) -> u64 {
    let Some(mut rx) = chain_height else {
        return std::future::pending().await;
    };
    loop {
        let best = *rx.borrow_and_update();
        if best >= height {
            return best;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn wait_set_up<M: ConsensusPayload + 'static>(round: Arc<MemberRound<M>>) {
    let chain_height = round.chain_height.clone();
    tokio::select! {
        _ = round.cancel_wait_setup.fired() => {}
        _ = tokio::time::sleep(round.ctx.wait_time) => {
            if round.state.transition(RoundState::WaitSetup, RoundState::WaitSetupTimeout) {
                warn!(height = round.ctx.height, round = %round.round, "timed out waiting for setup");
                let _ = round.timeout_tx.try_send(());
            }
        }
        best = chain_reached(chain_height, round.ctx.height) => {
            if round.state.get() == RoundState::WaitSetup {
                round.push_error(ConsensusError::ChainAdvanced { local: round.ctx.height, best });
            }
        }
    }
}

/// A member left out of the leader's quorum never gets a challenge; it stops
/// once the sealed block reaches its chain
async fn wait_challenge<M: ConsensusPayload + 'static>(round: Arc<MemberRound<M>>) {
    let chain_height = round.chain_height.clone();
    tokio::select! {
        _ = round.cancel_wait_challenge.fired() => {}
        _ = tokio::time::sleep(round.ctx.wait_time) => {
            if round.state.transition(RoundState::WaitChallenge, RoundState::WaitChallengeTimeout) {
                warn!(height = round.ctx.height, round = %round.round, "timed out waiting for challenge");
                let _ = round.timeout_tx.try_send(());
            }
        }
        best = chain_reached(chain_height, round.ctx.height) => {
            if round.state.get() == RoundState::WaitChallenge {
                round.push_error(ConsensusError::ChainAdvanced { local: round.ctx.height, best });
            }
        }
    }
}

fn dispatch<M: ConsensusPayload + 'static>(round: &Arc<MemberRound<M>>, queue: &MessageQueue, inbound: Inbound) {
    let Inbound { peer, message } = inbound;
    if message.round() != round.round {
        if (message.height(), message.round()) > (round.ctx.height, round.round) {
            queue.defer(Inbound { peer, message });
        } else {
            debug!(peer = %peer, round = %message.round(), "message for another round dropped");
        }
        return;
    }
    match message {
        ConsensusMessage::Setup(setup) => round.on_set_up(&peer, &setup),
        ConsensusMessage::Challenge(challenge) => round.on_challenge(&peer, &challenge),
        ConsensusMessage::Fail(fail) => round.on_fail(&peer, &fail),
        other => debug!(peer = %peer, code = other.code(), "member ignores message"),
    }
}

async fn process_p2p_message<M: ConsensusPayload + 'static>(
    round: Arc<MemberRound<M>>,
    queue: MessageQueue,
    mut stop: oneshot::Receiver<()>,
) {
    for inbound in queue.take_deferred() {
        dispatch(&round, &queue, inbound);
    }

    let receiver = queue.receiver();
    let mut receiver = receiver.lock().await;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            inbound = receiver.recv() => {
                let Some(inbound) = inbound else {
                    break;
                };
                dispatch(&round, &queue, inbound);
            }
        }
    }
}

/// Member role for one height
pub struct Member {
    ctx: Arc<MemberContext>,
    queue: MessageQueue,
    state: Arc<StateCell>,
    chain_height: Option<watch::Receiver<u64>>,
}

impl Member {
    /// `members` lists every producer; exactly one must be flagged leader
    pub fn new(
        key: PrivateKey,
        sender: Arc<dyn Sender>,
        members: &[MemberInfo],
        height: u64,
        wait_time: Duration,
        queue: MessageQueue,
    ) -> ConsensusResult<Self> {
        let leader = members
            .iter()
            .find(|m| m.is_leader)
            .cloned()
            .ok_or_else(|| ConsensusError::BpConfig("no leader among members".to_string()))?;

        Ok(Self {
            ctx: Arc::new(MemberContext {
                pubkey: key.public_key(),
                key,
                sender,
                leader,
                height,
                wait_time,
            }),
            queue,
            state: Arc::new(StateCell::new()),
            chain_height: None,
        })
    }

    /// Abandon the round once the chain reaches this member's height
    pub fn with_chain_height(mut self, chain_height: watch::Receiver<u64>) -> Self {
        self.chain_height = Some(chain_height);
        self
    }

    pub fn state(&self) -> RoundState {
        self.state.get()
    }

    pub fn reset(&mut self) {
        self.state = Arc::new(StateCell::new());
    }

    /// Run one round and return the message the member signed
    pub async fn process_consensus<M: ConsensusPayload + 'static>(
        &mut self,
        round: Round,
        convertor: Convertor<M>,
        validator: Validator<M>,
    ) -> ConsensusResult<M> {
        let started = Instant::now();
        let (error_tx, mut error_rx) = mpsc::channel(1);
        let (completed_tx, mut completed_rx) = mpsc::channel(1);
        let (timeout_tx, mut timeout_rx) = mpsc::channel(1);

        self.state = Arc::new(StateCell::new());
        let member_round = Arc::new(MemberRound {
            ctx: self.ctx.clone(),
            round,
            state: self.state.clone(),
            convertor,
            validator,
            progress: Mutex::new(Progress {
                msg: None,
                msg_hash: None,
                nonce: None,
            }),
            error_tx,
            completed_tx,
            timeout_tx,
            cancel_wait_setup: CancelSignal::new(),
            cancel_wait_challenge: CancelSignal::new(),
            chain_height: self.chain_height.clone(),
        });
        member_round.state.set(RoundState::WaitSetup);

        tokio::spawn(wait_set_up(member_round.clone()));
        let (stop_tx, stop_rx) = oneshot::channel();
        let dispatcher = tokio::spawn(process_p2p_message(member_round.clone(), self.queue.clone(), stop_rx));

        let result = tokio::select! {
            Some(err) = error_rx.recv() => Err(err),
            Some(()) = timeout_rx.recv() => Err(ConsensusError::Timeout),
            Some(()) = completed_rx.recv() => member_round.take_message(),
            else => Err(ConsensusError::Status("round channels closed".to_string())),
        };

        member_round.cancel_wait_setup.fire();
        member_round.cancel_wait_challenge.fire();
        let _ = stop_tx.send(());
        let _ = dispatcher.await;

        metrics::record_round("member", result.is_ok(), started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => info!(height = self.ctx.height, round = %round, "member round completed"),
            Err(e) => debug!(height = self.ctx.height, round = %round, error = %e, "member round failed"),
        }
        result
    }
}
