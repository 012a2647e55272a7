//! Genesis configuration and genesis block
//!
//! The genesis document is the only configuration the engine consumes.
//! Field names mirror the network's `genesis.json`; the document is
//! read-only after load.

use serde::{Deserialize, Serialize};

use crate::consensus::{Block, BlockHeader};
use crate::constants::GENESIS_TIMESTAMP;
use crate::crypto::{Address, Hash};

/// A scheduled reward reduction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HalvingEvent {
    pub after_blocks: u64,
    pub reward_multiplier: f64,
}

/// Fair-launch protection: a difficulty floor and a reduced initial
/// reward during the first hours of the chain. The two effects are
/// independent toggles of the same window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchGuard {
    pub enabled: bool,
    pub duration_hours: u64,
    pub difficulty_floor_multiplier: f64,
    pub initial_reward: f64,
}

impl Default for LaunchGuard {
    fn default() -> Self {
        LaunchGuard {
            enabled: false,
            duration_hours: 0,
            difficulty_floor_multiplier: 1.0,
            initial_reward: 0.0,
        }
    }
}

/// Difficulty adjustment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyConfig {
    #[serde(default)]
    pub algo: String,
    /// Number of recent block timestamps averaged per adjustment
    pub window: u64,
    pub initial_difficulty: u64,
    pub max_adjust_per_block_pct: u64,
    /// Test-network escape hatch: accept any proof of work at
    /// difficulty 4 and below. Defaults off; must never be set on a
    /// production network.
    #[serde(default)]
    pub allow_trivial_pow: bool,
    #[serde(default)]
    pub launch_guard: LaunchGuard,
}

/// Network fee configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFeeConfig {
    /// Share of the base block reward routed to the treasury
    pub block_fee_rate: f64,
    /// Share of aggregate transaction fees routed to the treasury
    pub tx_fee_share_treasury: f64,
    /// Minimum transaction fee in whole KALON
    pub base_tx_fee: f64,
    #[serde(default)]
    pub gas_price: u64,
}

/// Governance parameters (carried verbatim; not interpreted by the engine)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceParameters {
    #[serde(default)]
    pub network_fee_rate: f64,
    #[serde(default)]
    pub tx_fee_share_treasury: f64,
    #[serde(default)]
    pub treasury_cap_percent: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceConfig {
    #[serde(default)]
    pub parameters: GovernanceParameters,
}

/// The genesis configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisConfig {
    pub chain_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(rename = "blockTimeTargetSeconds")]
    pub block_time_target: u64,
    #[serde(default)]
    pub max_supply: u64,
    pub initial_block_reward: f64,
    #[serde(default)]
    pub halving_schedule: Vec<HalvingEvent>,
    pub difficulty: DifficultyConfig,
    #[serde(default)]
    pub treasury_address: String,
    pub network_fee: NetworkFeeConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
}

impl GenesisConfig {
    /// Parse a genesis document from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Height of the first block past the launch-guard window
    pub fn launch_guard_blocks(&self) -> u64 {
        if self.block_time_target == 0 {
            return 0;
        }
        self.difficulty.launch_guard.duration_hours * 3600 / self.block_time_target
    }

    /// Whether the launch guard applies at `height`
    pub fn launch_guard_active(&self, height: u64) -> bool {
        self.difficulty.launch_guard.enabled && height < self.launch_guard_blocks()
    }
}

/// Build the deterministic genesis block for a configuration.
///
/// Genesis is not mined: zero parent, zero miner, nonce 0, no
/// transactions, a fixed timestamp, and the configured initial
/// difficulty. Every node derives the identical block id.
pub fn create_genesis_block(config: &GenesisConfig) -> Block {
    let header = BlockHeader {
        parent_id: Hash::zero(),
        height: 0,
        timestamp: GENESIS_TIMESTAMP,
        difficulty: config.difficulty.initial_difficulty,
        miner: Address::zero(),
        nonce: 0,
        merkle_root: Hash::zero(),
        tx_count: 0,
        network_fee: 0,
        treasury_fee: 0,
    };

    Block::new(header, Vec::new())
}
