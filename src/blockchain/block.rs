use std::sync::atomic::{AtomicBool, Ordering};

use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::transaction::Transaction;

/// Timestamp of the genesis block, shared by every node so that
/// independently started peers agree on block 0
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200_000;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Proof of work nonce
    pub nonce: u64,

    /// Hash of the current block
    pub hash: String,
}

impl Block {
    /// Creates a new, not yet mined block
    ///
    /// # Arguments
    ///
    /// * `timestamp` - The creation time in milliseconds
    /// * `transactions` - The list of transactions to include in the block
    /// * `previous_hash` - The hash of the previous block
    ///
    /// # Returns
    ///
    /// A new Block instance with nonce 0 and its hash computed
    pub fn new(timestamp: i64, transactions: Vec<Transaction>, previous_hash: String) -> Self {
        let mut block = Block {
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// The first block of every chain
    pub fn genesis() -> Self {
        Block::new(GENESIS_TIMESTAMP, Vec::new(), "0".to_string())
    }

    /// Calculates the hash of the block
    ///
    /// The digest input is the previous hash, the decimal timestamp, the
    /// JSON array of transactions and the decimal nonce, concatenated.
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn calculate_hash(&self) -> String {
        hash_with_nonce(&self.hash_prefix(), self.nonce)
    }

    /// Checks if the stored hash has `difficulty` leading zero hex digits
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.hash.starts_with(&"0".repeat(difficulty as usize))
    }

    /// Searches for a nonce satisfying `difficulty`, without any way to stop
    pub fn mine(&mut self, difficulty: u32) {
        self.mine_cancellable(difficulty, &AtomicBool::new(false));
    }

    /// Searches for a nonce satisfying `difficulty` until `abort` is raised
    ///
    /// The search starts from the current nonce. `nonce` and `hash` are only
    /// meaningful once this returns true.
    ///
    /// # Returns
    ///
    /// true if a valid nonce was found, false if the search was abandoned
    pub fn mine_cancellable(&mut self, difficulty: u32, abort: &AtomicBool) -> bool {
        let target = "0".repeat(difficulty as usize);
        let prefix = self.hash_prefix();

        self.hash = hash_with_nonce(&prefix, self.nonce);
        while !self.hash.starts_with(&target) {
            if abort.load(Ordering::Relaxed) {
                return false;
            }
            self.nonce += 1;
            self.hash = hash_with_nonce(&prefix, self.nonce);
        }

        info!("Block mined: {}", self.hash);
        true
    }

    fn hash_prefix(&self) -> String {
        let transactions = serde_json::to_string(&self.transactions)
            .expect("transactions always serialize to JSON");
        format!("{}{}{}", self.previous_hash, self.timestamp, transactions)
    }
}

fn hash_with_nonce(prefix: &str, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
