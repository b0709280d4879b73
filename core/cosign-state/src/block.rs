//! Block structures

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::transaction::Transaction;
use crate::{Address, Hash, StateError, StateResult};

/// How a block's proof payload is to be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofKind {
    /// Not yet sealed by consensus
    Unsigned,
    /// Aggregated Schnorr signature of a producer quorum
    MultiSig,
}

/// Opaque consensus evidence attached to a sealed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub kind: ProofKind,
    pub evidence: Vec<u8>,
}

impl Proof {
    pub fn unsigned() -> Self {
        Self {
            kind: ProofKind::Unsigned,
            evidence: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Block height
    pub height: u64,
    /// Unix timestamp in seconds
    pub timestamp: u64,
    /// Hash of the parent block
    pub previous_hash: Hash,
    /// Merkle root of the transaction hashes
    pub tx_root: Hash,
    /// Ledger root after executing the block and crediting rewards
    pub state_root: Hash,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Account credited with the leader's reward
    pub coinbase: Address,
}

/// Header fields covered by the producers' signature
#[derive(Serialize)]
struct SignMessage<'a> {
    version: u32,
    height: u64,
    timestamp: u64,
    previous_hash: &'a Hash,
    tx_root: &'a Hash,
    gas_limit: u64,
    gas_used: u64,
    coinbase: &'a Address,
}

/// Block in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub proof: Proof,
}

impl Block {
    pub const VERSION: u32 = 1;

    /// Create an unsealed block; `state_root` is filled in after execution
    pub fn new(
        height: u64,
        timestamp: u64,
        previous_hash: Hash,
        transactions: Vec<Transaction>,
        gas_limit: u64,
        gas_used: u64,
        coinbase: Address,
    ) -> StateResult<Self> {
        let tx_root = Self::calculate_tx_root(&transactions)?;
        Ok(Self {
            header: BlockHeader {
                version: Self::VERSION,
                height,
                timestamp,
                previous_hash,
                tx_root,
                state_root: [0u8; 32],
                gas_limit,
                gas_used,
                coinbase,
            },
            transactions,
            proof: Proof::unsigned(),
        })
    }

    /// Genesis block committing to the initial ledger root
    pub fn genesis(state_root: Hash, timestamp: u64) -> Self {
        Self {
            header: BlockHeader {
                version: Self::VERSION,
                height: 0,
                timestamp,
                previous_hash: [0u8; 32],
                tx_root: [0u8; 32],
                state_root,
                gas_limit: 0,
                gas_used: 0,
                coinbase: Address::new(),
            },
            transactions: Vec::new(),
            proof: Proof::unsigned(),
        }
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Block identity, covering the full header including the state root
    pub fn hash(&self) -> Hash {
        let header = &self.header;
        let mut hasher = Sha3_256::new();
        hasher.update(header.version.to_le_bytes());
        hasher.update(header.height.to_le_bytes());
        hasher.update(header.timestamp.to_le_bytes());
        hasher.update(header.previous_hash);
        hasher.update(header.tx_root);
        hasher.update(header.state_root);
        hasher.update(header.gas_limit.to_le_bytes());
        hasher.update(header.gas_used.to_le_bytes());
        hasher.update(header.coinbase.as_bytes());

        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    /// Canonical bytes signed by producers.
    ///
    /// Excludes the state root, which is agreed separately after execution,
    /// and the proof itself.
    pub fn as_sign_message(&self) -> StateResult<Vec<u8>> {
        let header = &self.header;
        let message = SignMessage {
            version: header.version,
            height: header.height,
            timestamp: header.timestamp,
            previous_hash: &header.previous_hash,
            tx_root: &header.tx_root,
            gas_limit: header.gas_limit,
            gas_used: header.gas_used,
            coinbase: &header.coinbase,
        };
        Ok(bincode::serialize(&message)?)
    }

    pub fn encode(&self) -> StateResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> StateResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Merkle root of transaction hashes; odd nodes are paired with themselves
    pub fn calculate_tx_root(transactions: &[Transaction]) -> StateResult<Hash> {
        if transactions.is_empty() {
            return Ok([0u8; 32]);
        }

        let mut hashes = transactions
            .iter()
            .map(Transaction::hash)
            .collect::<StateResult<Vec<Hash>>>()?;

        while hashes.len() > 1 {
            hashes = hashes
                .chunks(2)
                .map(|pair| {
                    let mut hasher = Sha3_256::new();
                    hasher.update(pair[0]);
                    hasher.update(pair.get(1).unwrap_or(&pair[0]));
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&hasher.finalize());
                    hash
                })
                .collect();
        }

        Ok(hashes[0])
    }

    /// Structural checks that need no ledger access
    pub fn validate(&self) -> StateResult<()> {
        if self.header.version != Self::VERSION {
            return Err(StateError::InvalidBlock(format!(
                "unsupported version {}",
                self.header.version
            )));
        }
        if self.header.gas_used > self.header.gas_limit {
            return Err(StateError::InvalidBlock(format!(
                "gas used {} exceeds limit {}",
                self.header.gas_used, self.header.gas_limit
            )));
        }
        if Self::calculate_tx_root(&self.transactions)? != self.header.tx_root {
            return Err(StateError::InvalidBlock("tx root mismatch".to_string()));
        }
        for tx in &self.transactions {
            tx.validate()?;
        }
        Ok(())
    }
}
