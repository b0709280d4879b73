//! Round messages and their wire codec.
//!
//! Every message travels as `(code, bincode body)`. Bodies carry a per-type
//! magic number so a body decoded under the wrong code is rejected.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::ConsensusError;
use crate::round::Round;
use crate::schnorr::{Point, PublicKey, Signature};
use crate::ConsensusResult;

pub const MSG_TYPE_SETUP: u64 = 0;
pub const MSG_TYPE_COMMITMENT: u64 = 1;
pub const MSG_TYPE_RESPONSE: u64 = 2;
pub const MSG_TYPE_CHALLENGE: u64 = 3;
pub const MSG_TYPE_FAIL: u64 = 4;

/// Largest body accepted from the wire
pub const MAX_MSG_SIZE: usize = 20 << 20;

pub const SETUP_MAGIC: u32 = 0xfefe_fbfe;
pub const COMMIT_MAGIC: u32 = 0xfefe_fbfd;
pub const CHALLENGE_MAGIC: u32 = 0xfefe_fbfc;
pub const FAIL_MAGIC: u32 = 0xfefe_fbfb;
pub const RESPONSE_MAGIC: u32 = 0xfefe_fbfa;

/// Leader to members: the payload to sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setup {
    pub height: u64,
    pub magic: u32,
    pub round: Round,
    pub msg: Vec<u8>,
}

/// Member to leader: nonce commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub height: u64,
    pub magic: u32,
    pub round: Round,
    pub bp_key: PublicKey,
    pub q: Point,
}

/// Leader to member: everybody else's combined key and commitment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub height: u64,
    pub magic: u32,
    pub round: Round,
    pub sigma_pub_key: PublicKey,
    pub sigma_q: Point,
    /// Hash of the message being signed
    pub r: [u8; 32],
}

/// Member to leader: partial signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub height: u64,
    pub magic: u32,
    pub round: Round,
    pub bp_key: PublicKey,
    pub s: Signature,
}

/// Leader to members: the round is abandoned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fail {
    pub height: u64,
    pub magic: u32,
    pub round: Round,
    pub reason: String,
}

impl Setup {
    pub fn new(height: u64, round: Round, msg: Vec<u8>) -> Self {
        Self { height, magic: SETUP_MAGIC, round, msg }
    }
}

impl Commitment {
    pub fn new(height: u64, round: Round, bp_key: PublicKey, q: Point) -> Self {
        Self { height, magic: COMMIT_MAGIC, round, bp_key, q }
    }
}

impl Challenge {
    pub fn new(height: u64, round: Round, sigma_pub_key: PublicKey, sigma_q: Point, r: [u8; 32]) -> Self {
        Self {
            height,
            magic: CHALLENGE_MAGIC,
            round,
            sigma_pub_key,
            sigma_q,
            r,
        }
    }
}

impl Response {
    pub fn new(height: u64, round: Round, bp_key: PublicKey, s: Signature) -> Self {
        Self { height, magic: RESPONSE_MAGIC, round, bp_key, s }
    }
}

impl Fail {
    pub fn new(height: u64, round: Round, reason: impl Into<String>) -> Self {
        Self {
            height,
            magic: FAIL_MAGIC,
            round,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    Setup(Setup),
    Commitment(Commitment),
    Challenge(Challenge),
    Response(Response),
    Fail(Fail),
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> ConsensusResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn check_magic(kind: &'static str, expected: u32, found: u32) -> ConsensusResult<()> {
    if expected != found {
        return Err(ConsensusError::BadMagic { kind, expected, found });
    }
    Ok(())
}

impl ConsensusMessage {
    pub fn code(&self) -> u64 {
        match self {
            ConsensusMessage::Setup(_) => MSG_TYPE_SETUP,
            ConsensusMessage::Commitment(_) => MSG_TYPE_COMMITMENT,
            ConsensusMessage::Challenge(_) => MSG_TYPE_CHALLENGE,
            ConsensusMessage::Response(_) => MSG_TYPE_RESPONSE,
            ConsensusMessage::Fail(_) => MSG_TYPE_FAIL,
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            ConsensusMessage::Setup(m) => m.height,
            ConsensusMessage::Commitment(m) => m.height,
            ConsensusMessage::Challenge(m) => m.height,
            ConsensusMessage::Response(m) => m.height,
            ConsensusMessage::Fail(m) => m.height,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            ConsensusMessage::Setup(m) => m.round,
            ConsensusMessage::Commitment(m) => m.round,
            ConsensusMessage::Challenge(m) => m.round,
            ConsensusMessage::Response(m) => m.round,
            ConsensusMessage::Fail(m) => m.round,
        }
    }

    /// Goes to the member queue (otherwise the leader queue)
    pub fn is_for_member(&self) -> bool {
        matches!(
            self,
            ConsensusMessage::Setup(_) | ConsensusMessage::Challenge(_) | ConsensusMessage::Fail(_)
        )
    }

    pub fn encode(&self) -> ConsensusResult<Vec<u8>> {
        let bytes = match self {
            ConsensusMessage::Setup(m) => bincode::serialize(m)?,
            ConsensusMessage::Commitment(m) => bincode::serialize(m)?,
            ConsensusMessage::Challenge(m) => bincode::serialize(m)?,
            ConsensusMessage::Response(m) => bincode::serialize(m)?,
            ConsensusMessage::Fail(m) => bincode::serialize(m)?,
        };
        if bytes.len() > MAX_MSG_SIZE {
            return Err(ConsensusError::MsgSize {
                size: bytes.len(),
                max: MAX_MSG_SIZE,
            });
        }
        Ok(bytes)
    }

    pub fn decode(code: u64, bytes: &[u8]) -> ConsensusResult<Self> {
        if bytes.len() > MAX_MSG_SIZE {
            return Err(ConsensusError::MsgSize {
                size: bytes.len(),
                max: MAX_MSG_SIZE,
            });
        }

        match code {
            MSG_TYPE_SETUP => {
                let m: Setup = decode_body(bytes)?;
                check_magic("setup", SETUP_MAGIC, m.magic)?;
                Ok(ConsensusMessage::Setup(m))
            }
            MSG_TYPE_COMMITMENT => {
                let m: Commitment = decode_body(bytes)?;
                check_magic("commitment", COMMIT_MAGIC, m.magic)?;
                Ok(ConsensusMessage::Commitment(m))
            }
            MSG_TYPE_CHALLENGE => {
                let m: Challenge = decode_body(bytes)?;
                check_magic("challenge", CHALLENGE_MAGIC, m.magic)?;
                Ok(ConsensusMessage::Challenge(m))
            }
            MSG_TYPE_RESPONSE => {
                let m: Response = decode_body(bytes)?;
                check_magic("response", RESPONSE_MAGIC, m.magic)?;
                Ok(ConsensusMessage::Response(m))
            }
            MSG_TYPE_FAIL => {
                let m: Fail = decode_body(bytes)?;
                check_magic("fail", FAIL_MAGIC, m.magic)?;
                Ok(ConsensusMessage::Fail(m))
            }
            other => Err(ConsensusError::UnknownMessage(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schnorr::PrivateKey;

    #[test]
    fn test_decode_rejects_body_under_wrong_code() {
        let fail = ConsensusMessage::Fail(Fail::new(9, Round::Proposal, "waitForCommit fail"));
        let bytes = fail.encode().unwrap();

        assert_eq!(ConsensusMessage::decode(MSG_TYPE_FAIL, &bytes).unwrap(), fail);
        assert!(ConsensusMessage::decode(MSG_TYPE_SETUP, &bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut setup = Setup::new(3, Round::Confirmation, vec![1, 2, 3]);
        setup.magic = COMMIT_MAGIC;
        let bytes = bincode::serialize(&setup).unwrap();

        let err = ConsensusMessage::decode(MSG_TYPE_SETUP, &bytes).unwrap_err();
        assert!(matches!(err, ConsensusError::BadMagic { kind: "setup", .. }));
    }

    #[test]
    fn test_decode_rejects_unknown_code_and_oversize() {
        assert!(matches!(
            ConsensusMessage::decode(42, &[]),
            Err(ConsensusError::UnknownMessage(42))
        ));

        let huge = vec![0u8; MAX_MSG_SIZE + 1];
        assert!(matches!(
            ConsensusMessage::decode(MSG_TYPE_SETUP, &huge),
            Err(ConsensusError::MsgSize { .. })
        ));
    }

    #[test]
    fn test_commitment_carries_points() {
        let key = PrivateKey::generate();
        let (_, q) = crate::schnorr::generate_commitment(&key, b"m").unwrap();
        let msg = ConsensusMessage::Commitment(Commitment::new(5, Round::Proposal, key.public_key(), q));

        let decoded = ConsensusMessage::decode(msg.code(), &msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(!decoded.is_for_member());
        assert_eq!(decoded.height(), 5);
    }
}
