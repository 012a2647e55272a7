//! Block structure
//!
//! The header's canonical byte layout defines the block id and is a
//! network-level contract: any change is a hard fork.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_bytes, Address, Hash};
use crate::validation::Transaction;

/// Length of the canonical header encoding
pub const HEADER_BYTES_LEN: usize = 32 + 8 + 8 + 8 + 20 + 8 + 32 + 4 + 8 + 8;

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Id of the parent block; zero for genesis
    pub parent_id: Hash,
    /// Height in the chain, starting at 0
    pub height: u64,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
    /// Difficulty the proof of work must satisfy
    pub difficulty: u64,
    /// Address the coinbase pays; zero on genesis
    pub miner: Address,
    /// Proof-of-work nonce
    pub nonce: u64,
    /// Merkle root over the transaction ids
    pub merkle_root: Hash,
    /// Number of transactions in the body
    pub tx_count: u32,
    /// Miner's total take (block share + fee share), accounting only
    pub network_fee: u64,
    /// Treasury's total take, accounting only
    pub treasury_fee: u64,
}

impl BlockHeader {
    /// Canonical header bytes, big-endian at fixed offsets:
    /// `parent ‖ height ‖ timestamp ‖ difficulty ‖ miner ‖ nonce ‖
    ///  merkle_root ‖ tx_count ‖ network_fee ‖ treasury_fee`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_BYTES_LEN);
        bytes.extend_from_slice(&self.parent_id.0);
        bytes.extend_from_slice(&self.height.to_be_bytes());
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&self.difficulty.to_be_bytes());
        bytes.extend_from_slice(&self.miner.0);
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.tx_count.to_be_bytes());
        bytes.extend_from_slice(&self.network_fee.to_be_bytes());
        bytes.extend_from_slice(&self.treasury_fee.to_be_bytes());
        bytes
    }

    /// The block id: SHA-256 over the canonical header bytes
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }
}

/// A complete block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// The block id
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Whether this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.parent_id.is_zero()
    }
}
