//! Difficulty adjustment and proof-of-work targets
//!
//! Difficulty is a positive integer: a block id must carry
//! `difficulty - 1` leading zero bits. Adjustment averages block
//! spacing over a rolling timestamp window and clamps the per-block
//! change to the configured percentage.

use crate::constants::TRIVIAL_POW_MAX_DIFFICULTY;
use crate::crypto::Hash;
use crate::node::GenesisConfig;

/// Calculate the required difficulty for a block at `height`.
///
/// `recent_timestamps` are the timestamps of the most recent applied
/// blocks in chain order, parent last. With fewer than `window`
/// observed blocks the parent difficulty is carried unchanged.
pub fn calculate_difficulty(
    config: &GenesisConfig,
    height: u64,
    parent_difficulty: u64,
    recent_timestamps: &[u64],
) -> u64 {
    if height == 0 {
        return config.difficulty.initial_difficulty;
    }

    if config.launch_guard_active(height) {
        let floor = config.difficulty.launch_guard.difficulty_floor_multiplier;
        let floored = (config.difficulty.initial_difficulty as f64 * floor) as u64;
        return floored.max(1);
    }

    let window = config.difficulty.window as usize;
    if window < 2 || recent_timestamps.len() < window {
        return parent_difficulty;
    }

    let recent = &recent_timestamps[recent_timestamps.len() - window..];
    let span = recent[window - 1].saturating_sub(recent[0]);
    let average_spacing = span as f64 / (window - 1) as f64;

    let max_adjust = config.difficulty.max_adjust_per_block_pct as f64 / 100.0;
    let factor = if average_spacing > 0.0 {
        (config.block_time_target as f64 / average_spacing)
            .clamp(1.0 - max_adjust, 1.0 + max_adjust)
    } else {
        // zero observed spacing: blocks arrived as fast as possible
        1.0 + max_adjust
    };

    ((parent_difficulty as f64 * factor) as u64).max(1)
}

/// The 32-byte big-endian target for a difficulty: `difficulty - 1`
/// leading zero bits, all remaining bits set.
pub fn target_for_difficulty(difficulty: u64) -> [u8; 32] {
    let mut target = [0u8; 32];
    let zero_bits = difficulty.saturating_sub(1);
    if zero_bits >= 256 {
        return target;
    }

    let full_bytes = (zero_bits / 8) as usize;
    let partial_bits = (zero_bits % 8) as u32;

    target[full_bytes] = 0xFFu8 >> partial_bits;
    for byte in target.iter_mut().skip(full_bytes + 1) {
        *byte = 0xFF;
    }

    target
}

/// Whether a block id satisfies the target for `difficulty`
pub fn meets_target(block_id: &Hash, difficulty: u64) -> bool {
    block_id.0 <= target_for_difficulty(difficulty)
}

/// Full proof-of-work check for a block id.
///
/// When the genesis config enables `allowTrivialPow`, any id passes at
/// difficulty 4 and below. That escape hatch exists for test networks
/// only and is off by default.
pub fn check_proof_of_work(config: &GenesisConfig, block_id: &Hash, difficulty: u64) -> bool {
    if config.difficulty.allow_trivial_pow && difficulty <= TRIVIAL_POW_MAX_DIFFICULTY {
        return true;
    }
    meets_target(block_id, difficulty)
}
