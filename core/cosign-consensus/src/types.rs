//! Producer set, bitmaps and round payloads

use std::fmt;

use cosign_state::{sha3_hash, Address, Block, Hash, Proof, ProofKind};
use serde::{Deserialize, Serialize};

use crate::errors::ConsensusError;
use crate::schnorr::{PublicKey, Signature};
use crate::ConsensusResult;

/// Opaque transport handle for a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// Pre-configured block producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub pubkey: PublicKey,
    /// Peer handle on the transport
    pub node: PeerId,
}

impl Producer {
    /// Account credited with this producer's rewards
    pub fn address(&self) -> Address {
        account_address(&self.pubkey)
    }
}

/// Derive the ledger address of a public key
pub fn account_address(pubkey: &PublicKey) -> Address {
    let hash = sha3_hash(&pubkey.to_bytes());
    hex::encode(&hash[12..])
}

/// Smallest commit quorum for `n` producers, `ceil(2n/3)`
pub fn min_member(n: usize) -> usize {
    (2 * n + 2) / 3
}

/// Ordered producer list; positions are the indices used in every bitmap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSet(Vec<Producer>);

impl ProducerSet {
    pub fn new(producers: Vec<Producer>) -> Self {
        ProducerSet(producers)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Producer> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Producer> {
        self.0.iter()
    }

    pub fn index_of(&self, pubkey: &PublicKey) -> Option<usize> {
        self.0.iter().position(|p| &p.pubkey == pubkey)
    }

    pub fn index_of_peer(&self, peer: &PeerId) -> Option<usize> {
        self.0.iter().position(|p| &p.node == peer)
    }

    pub fn quorum(&self) -> usize {
        min_member(self.len())
    }
}

/// Producers in force at a given height
pub trait ProducerSource: Send + Sync {
    fn producers_at(&self, height: u64) -> ConsensusResult<ProducerSet>;
}

impl ProducerSource for ProducerSet {
    fn producers_at(&self, _height: u64) -> ConsensusResult<ProducerSet> {
        Ok(self.clone())
    }
}

/// Runtime view of one producer for the current round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub producer: Producer,
    /// Position in the producer set
    pub index: usize,
    pub is_me: bool,
    pub is_online: bool,
    pub is_leader: bool,
}

impl MemberInfo {
    pub fn peer(&self) -> &PeerId {
        &self.producer.node
    }
}

/// One flag per producer index
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitmap(Vec<u8>);

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Bitmap(vec![0; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Set `index`; false when out of range or already set
    pub fn mark(&mut self, index: usize) -> bool {
        match self.0.get_mut(index) {
            Some(bit) if *bit == 0 => {
                *bit = 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.0.get(index).copied() == Some(1)
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|b| **b == 1).count()
    }

    /// Indices of set entries in ascending order
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == 1)
            .map(|(i, _)| i)
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: String = self.0.iter().map(|b| if *b == 1 { '1' } else { '0' }).collect();
        write!(f, "Bitmap({bits})")
    }
}

/// Finished round: aggregate signature, leader and participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSignature {
    pub sig: Signature,
    pub leader: usize,
    pub bitmap: Bitmap,
}

impl MultiSignature {
    pub fn new(sig: Signature, leader: usize, bitmap: Bitmap) -> Self {
        Self { sig, leader, bitmap }
    }

    pub fn to_proof(&self) -> ConsensusResult<Proof> {
        Ok(Proof {
            kind: ProofKind::MultiSig,
            evidence: bincode::serialize(self)?,
        })
    }

    pub fn from_proof(proof: &Proof) -> ConsensusResult<Self> {
        if proof.kind != ProofKind::MultiSig {
            return Err(ConsensusError::MultiSig(format!("unexpected proof kind {:?}", proof.kind)));
        }
        Ok(bincode::deserialize(&proof.evidence)?)
    }
}

/// Anything a round can agree on
pub trait ConsensusPayload: Send + Sync {
    /// Bytes whose hash is signed
    fn as_sign_message(&self) -> ConsensusResult<Vec<u8>>;

    /// Bytes shipped to members in Setup
    fn as_message(&self) -> ConsensusResult<Vec<u8>>;
}

impl ConsensusPayload for Block {
    fn as_sign_message(&self) -> ConsensusResult<Vec<u8>> {
        Ok(Block::as_sign_message(self)?)
    }

    fn as_message(&self) -> ConsensusResult<Vec<u8>> {
        Ok(self.encode()?)
    }
}

/// Round-2 payload: round-1 multi-signature plus the post-execution root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedBlockMessage {
    pub multi_sig: MultiSignature,
    pub state_root: Hash,
}

impl CompletedBlockMessage {
    pub fn decode(bytes: &[u8]) -> ConsensusResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl ConsensusPayload for CompletedBlockMessage {
    fn as_sign_message(&self) -> ConsensusResult<Vec<u8>> {
        self.as_message()
    }

    fn as_message(&self) -> ConsensusResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}
