// Difficulty retarget
//
// Every DIFFICULTY_ADJUSTMENT_INTERVAL blocks the time spent on the last
// interval is compared against the target. There is no smoothing: the
// difficulty moves by exactly one step or stays put.

use log::{info, warn};

use super::block::Block;

/// Number of blocks between two retargets
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: usize = 5;

/// Target time between two blocks, in milliseconds
pub const BLOCK_GENERATION_INTERVAL_MS: i64 = 10_000;

/// Difficulty never drops below this value
pub const MIN_DIFFICULTY: u32 = 1;

/// Hex digits in a block hash, no target above this can ever be met
pub const MAX_DIFFICULTY: u32 = 64;

/// Computes the difficulty to use after the tip of `chain`
///
/// # Arguments
///
/// * `chain` - The full chain, genesis first
/// * `current` - The difficulty the tip was mined with
///
/// # Returns
///
/// `current + 1` when the last interval was mined in under half the expected
/// time, `current - 1` (floored at 1) when it took more than twice the
/// expected time, `current` otherwise or when the chain is not on a
/// retarget boundary. The result always lies in
/// `MIN_DIFFICULTY..=MAX_DIFFICULTY`.
pub fn adjust_difficulty(chain: &[Block], current: u32) -> u32 {
    let current = current.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
    let length = chain.len();
    if length % DIFFICULTY_ADJUSTMENT_INTERVAL != 0 || length <= DIFFICULTY_ADJUSTMENT_INTERVAL {
        return current;
    }

    let previous_adjustment = &chain[length - DIFFICULTY_ADJUSTMENT_INTERVAL];
    let latest = &chain[length - 1];
    let time_expected = BLOCK_GENERATION_INTERVAL_MS * DIFFICULTY_ADJUSTMENT_INTERVAL as i64;
    // timestamps come from peers and may be anywhere in the i64 range
    let Some(time_taken) = latest.timestamp.checked_sub(previous_adjustment.timestamp) else {
        warn!(
            "Ignoring retarget over unusable timestamps {} and {}",
            previous_adjustment.timestamp, latest.timestamp
        );
        return current;
    };

    if time_taken < time_expected / 2 {
        let raised = (current + 1).min(MAX_DIFFICULTY);
        info!(
            "Mining too fast ({}ms vs {}ms), increasing difficulty to {}",
            time_taken, time_expected, raised
        );
        raised
    } else if time_taken > time_expected * 2 {
        let lowered = current.saturating_sub(1).max(MIN_DIFFICULTY);
        info!(
            "Mining too slow ({}ms vs {}ms), decreasing difficulty to {}",
            time_taken, time_expected, lowered
        );
        lowered
    } else {
        current
    }
}
