//! Round identity, role state and the cancellation signal shared by waits

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

/// Which of the two rounds at a height a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Round {
    /// Agree on the proposed block
    Proposal,
    /// Agree on the multi-signature and post-execution state root
    Confirmation,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Round::Proposal => f.write_str("proposal"),
            Round::Confirmation => f.write_str("confirmation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Init,
    WaitSetup,
    WaitSetupTimeout,
    WaitCommit,
    WaitCommitCompleted,
    WaitCommitTimeout,
    WaitChallenge,
    WaitChallengeTimeout,
    WaitResponse,
    WaitResponseCompleted,
    WaitResponseTimeout,
    Completed,
    Error,
}

impl RoundState {
    /// Terminal for a member round
    pub fn is_finished(&self) -> bool {
        matches!(self, RoundState::Completed | RoundState::Error)
    }
}

/// Lock-guarded state holder of one role instance
#[derive(Debug)]
pub struct StateCell(RwLock<RoundState>);

impl StateCell {
    pub fn new() -> Self {
        StateCell(RwLock::new(RoundState::Init))
    }

    pub fn get(&self) -> RoundState {
        *self.0.read()
    }

    pub fn set(&self, state: RoundState) {
        *self.0.write() = state;
    }

    /// Move to `next` only from `expected`
    pub fn transition(&self, expected: RoundState, next: RoundState) -> bool {
        let mut state = self.0.write();
        if *state == expected {
            *state = next;
            true
        } else {
            false
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-delivery signal backed by a channel of capacity one.
///
/// `fire` never blocks; repeated firing while a signal is pending is
/// absorbed.
#[derive(Debug)]
pub struct CancelSignal {
    tx: mpsc::Sender<()>,
    rx: Mutex<mpsc::Receiver<()>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx: Mutex::new(rx) }
    }

    pub fn fire(&self) {
        let _ = self.tx.try_send(());
    }

    /// Resolve once the signal has fired
    pub async fn fired(&self) {
        let mut rx = self.rx.lock().await;
        let _ = rx.recv().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
