// Longest-chain rule
//
// A candidate replaces the local chain when it is strictly longer, starts
// with the shared genesis block and every block links to its predecessor.
// Stored hashes are taken at face value: proof of work is not recomputed
// here, unlike Blockchain::is_chain_valid.

use log::{info, warn};

use crate::blockchain::{Block, Blockchain};

/// Result of offering a candidate chain to the local ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The candidate became the local chain
    Replaced,
    /// The candidate was not longer than the local chain
    NotLonger,
    /// The candidate failed the structural checks
    Invalid,
}

/// Checks the genesis block and hash linkage of `chain`
pub fn is_valid_chain(chain: &[Block]) -> bool {
    match chain.first() {
        Some(genesis) if *genesis == Block::genesis() => {}
        _ => return false,
    }

    chain
        .windows(2)
        .all(|pair| pair[1].previous_hash == pair[0].hash)
}

/// Sums every amount created on `chain` by sender-less transactions
pub fn calculate_circulating_supply(chain: &[Block]) -> f64 {
    chain
        .iter()
        .flat_map(|block| block.transactions.iter())
        .filter(|tx| tx.is_supply_creating())
        .map(|tx| tx.amount)
        .sum()
}

/// Applies the longest-chain rule to `candidate`
///
/// A rejected candidate leaves the ledger untouched.
pub fn receive_chain(ledger: &mut Blockchain, candidate: Vec<Block>) -> SyncOutcome {
    if candidate.len() <= ledger.chain().len() {
        info!(
            "Received chain ({} blocks) is not longer than current chain ({} blocks). Do nothing.",
            candidate.len(),
            ledger.chain().len()
        );
        return SyncOutcome::NotLonger;
    }

    if !is_valid_chain(&candidate) {
        warn!("Received chain of {} blocks is not valid", candidate.len());
        return SyncOutcome::Invalid;
    }

    info!("Replacing current chain with received chain of {} blocks", candidate.len());
    let supply = calculate_circulating_supply(&candidate);
    ledger.replace_chain(candidate, supply);
    SyncOutcome::Replaced
}
