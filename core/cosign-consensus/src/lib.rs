//! Cosign Consensus Module
//!
//! Two-round BFT consensus for a fixed, ordered set of block producers.
//! Each height is agreed with a collective Schnorr multi-signature: the
//! first round signs the block proposal, the second signs the resulting
//! multi-signature together with the post-reward state root.

pub mod chain;
pub mod config;
pub mod engine;
pub mod errors;
pub mod leader;
pub mod member;
pub mod message;
pub mod metrics;
pub mod network;
pub mod reward;
pub mod round;
pub mod schnorr;
pub mod types;
pub mod validator;

// Re-export main types for public API
pub use chain::{BlockGenerator, ChainService};
pub use config::{BftConfig, ConsensusMode};
pub use engine::{BftConsensus, Role};
pub use errors::ConsensusError;
pub use leader::{Leader, RoundOutcome};
pub use member::{Convertor, Member, Validator};
pub use message::ConsensusMessage;
pub use network::{Inbound, MessageQueue, PeerEvent, PendingSend, Sender};
pub use reward::{block_issuance, RewardCalculator, RewardDistribution};
pub use round::{Round, RoundState};
pub use schnorr::{PrivateKey, PublicKey, Signature};
pub use types::{
    account_address, min_member, Bitmap, CompletedBlockMessage, ConsensusPayload, MemberInfo, MultiSignature,
    PeerId, Producer, ProducerSet, ProducerSource,
};
pub use validator::BlockMultiSigValidator;

pub type ConsensusResult<T> = Result<T, ConsensusError>;
