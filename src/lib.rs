//! Kalon blockchain chain engine
//!
//! The core of a Kalon proof-of-work node: deterministic block and
//! transaction hashing, UTXO ledger, consensus rules (difficulty,
//! rewards, halving, launch guard), mempool, and durable block storage.
//!
//! External collaborators (RPC front end, miner, wallet, P2P) drive the
//! engine exclusively through [`node::ChainEngine`].

pub mod consensus;
pub mod crypto;
pub mod node;
pub mod storage;
pub mod validation;

/// Protocol constants shared across the engine
pub mod constants {
    /// Smallest on-chain unit: one KALON = 1,000,000 micro-KALON
    pub const MICRO_PER_COIN: u64 = 1_000_000;

    /// Deterministic genesis timestamp (2021-01-01 00:00:00 UTC)
    pub const GENESIS_TIMESTAMP: u64 = 1_609_459_200;

    /// Maximum tolerated clock drift for incoming block timestamps
    pub const MAX_FUTURE_DRIFT_SECS: u64 = 120;

    /// Data tag identifying the coinbase transaction of a block
    pub const COINBASE_TAG: &[u8] = b"block_reward";

    /// Upper difficulty bound covered by the test-network escape hatch
    /// (only honored when `allowTrivialPow` is set in the genesis config)
    pub const TRIVIAL_POW_MAX_DIFFICULTY: u64 = 4;

    /// Bounded capacity of each event-bus subscriber channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 100;

    /// Hard cap on the `recent_blocks` page size
    pub const MAX_RECENT_BLOCKS: u32 = 100;

    /// Human-readable address prefix on the main network
    pub const ADDRESS_HRP_MAIN: &str = "kalon1";

    /// Human-readable address prefix on test networks
    pub const ADDRESS_HRP_TEST: &str = "tkalon1";
}
