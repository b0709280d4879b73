//! Error types for consensus module

use cosign_state::StateError;
use thiserror::Error;

use crate::schnorr::SchnorrError;

/// Consensus error types
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Producer set misconfigured
    #[error("bp config error: {0}")]
    BpConfig(String),

    /// Not enough online producers to run a round
    #[error("BFT not ready")]
    BftNotReady,

    /// This node is not in the producer set
    #[error("node is not in the producer set")]
    NotProducer,

    /// Member waited too long for the leader
    #[error("time out")]
    Timeout,

    /// Leader's height is below ours
    #[error("leader's height lower: local {local}, received {received}")]
    LowHeight { local: u64, received: u64 },

    /// Leader's height is above ours
    #[error("leader's height higher: local {local}, received {received}")]
    HighHeight { local: u64, received: u64 },

    /// Message arrived in a state that does not accept it
    #[error("error status: {0}")]
    Status(String),

    /// Message claims leadership but did not come from the round leader
    #[error("setUp: mistake leader")]
    LeaderMistake,

    /// Challenge is not over the message this member committed to
    #[error("challenge error")]
    Challenge,

    /// Injected validator rejected the round payload
    #[error("validate message error: {0}")]
    ValidateMsg(#[source] Box<ConsensusError>),

    /// Nonce generation produced an unusable scalar
    #[error("generate nonce error")]
    GenerateNonce,

    /// Leader could not gather enough commitments
    #[error("waitForCommit fail")]
    WaitCommit,

    /// Leader did not hear from every committed member
    #[error("waitForResponse fail")]
    WaitResponse,

    /// Aggregate signature did not verify
    #[error("signature not valid")]
    SignatureNotValid,

    /// Leader announced a failure this node does not recognise
    #[error("leader failed: {0}")]
    LeaderFailed(String),

    /// Chain moved past the round height while waiting
    #[error("chain advanced to {best} while waiting at height {local}")]
    ChainAdvanced { local: u64, best: u64 },

    /// Malformed multi-signature evidence
    #[error("multi-signature error: {0}")]
    MultiSig(String),

    /// Bitmap length differs from producer count
    #[error("bitmap length {actual} does not match producer count {expected}")]
    BitmapLength { expected: usize, actual: usize },

    /// Too few participants in a signed block
    #[error("insufficient participants: {actual} < {required}")]
    InsufficientParticipants { actual: usize, required: usize },

    /// Message exceeds the wire limit
    #[error("message size {size} exceeds max {max}")]
    MsgSize { size: usize, max: usize },

    /// Unknown message code
    #[error("unknown message code {0}")]
    UnknownMessage(u64),

    /// Magic number does not match message type
    #[error("bad magic {found:#x} for {kind}, expected {expected:#x}")]
    BadMagic {
        kind: &'static str,
        expected: u32,
        found: u32,
    },

    /// Re-executed gas differs from the header
    #[error("gas used mismatch: header {expected}, executed {actual}")]
    GasUsed { expected: u64, actual: u64 },

    /// Re-executed state root differs from the agreed one
    #[error("state root mismatch: expected {expected}, actual {actual}")]
    StateRootMismatch { expected: String, actual: String },

    /// Transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Cryptographic failure
    #[error("crypto error: {0}")]
    Crypto(#[from] SchnorrError),

    /// Ledger failure
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Encoding failure
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl ConsensusError {
    /// Map a leader's Fail reason back to the error it names
    pub fn from_fail_reason(reason: &str) -> Self {
        match reason {
            r if r == ConsensusError::WaitCommit.to_string() => ConsensusError::WaitCommit,
            r if r == ConsensusError::WaitResponse.to_string() => ConsensusError::WaitResponse,
            r if r == ConsensusError::SignatureNotValid.to_string() => ConsensusError::SignatureNotValid,
            other => ConsensusError::LeaderFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_reason_maps_known_errors() {
        let reason = ConsensusError::WaitCommit.to_string();
        assert!(matches!(ConsensusError::from_fail_reason(&reason), ConsensusError::WaitCommit));

        let reason = ConsensusError::SignatureNotValid.to_string();
        assert!(matches!(
            ConsensusError::from_fail_reason(&reason),
            ConsensusError::SignatureNotValid
        ));

        match ConsensusError::from_fail_reason("disk on fire") {
            ConsensusError::LeaderFailed(r) => assert_eq!(r, "disk on fire"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
