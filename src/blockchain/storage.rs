use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, TransactionError, TransactionalTree};
use sled::{Db, IVec, Transactional, Tree};
use thiserror::Error;

use super::block::Block;
use super::chain::{LedgerSnapshot, DEFAULT_DIFFICULTY, DEFAULT_MAX_SUPPLY, DEFAULT_MINING_REWARD};
use super::token::TokenMetadata;
use super::transaction::Transaction;

const DIFFICULTY_KEY: &str = "difficulty";
const MINING_REWARD_KEY: &str = "mining_reward";
const MAX_SUPPLY_KEY: &str = "max_supply";
const CIRCULATING_SUPPLY_KEY: &str = "circulating_supply";
const SAVED_AT_KEY: &str = "saved_at";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

/// Durable copy of the ledger state
///
/// Every save rewrites the whole state because a chain accepted from a peer
/// can replace any suffix of the stored one.
pub struct BlockchainStorage {
    /// The database instance
    db: Db,

    /// Blocks keyed by height
    blocks: Tree,

    /// Pending transactions keyed by queue position
    pending: Tree,

    /// Token metadata keyed by token id
    tokens: Tree,

    /// Ledger parameters and supply figures
    metadata: Tree,

    /// Held for the whole of a save
    save_lock: Mutex<()>,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage").finish_non_exhaustive()
    }
}

impl BlockchainStorage {
    /// Opens the storage at `path`, creating it if needed
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the database directory
    ///
    /// # Returns
    ///
    /// A new BlockchainStorage instance
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a throwaway database removed when dropped
    #[cfg(test)]
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let pending = db.open_tree("pending")?;
        let tokens = db.open_tree("tokens")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            pending,
            tokens,
            metadata,
            save_lock: Mutex::new(()),
        })
    }

    /// Replaces the stored state with `snapshot` and flushes it to disk
    ///
    /// All four trees are rewritten in one transaction, so a failed save
    /// leaves the previous snapshot readable.
    pub fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), StorageError> {
        if snapshot.chain.is_empty() {
            return Err(StorageError::SerializationError(
                "snapshot holds no blocks".to_string(),
            ));
        }

        let blocks = snapshot
            .chain
            .iter()
            .enumerate()
            .map(|(height, block)| Ok(((height as u64).to_be_bytes().to_vec(), encode(block)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let pending = snapshot
            .pending_transactions
            .iter()
            .enumerate()
            .map(|(position, tx)| Ok(((position as u64).to_be_bytes().to_vec(), encode(tx)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let tokens = snapshot
            .tokens
            .iter()
            .map(|token| Ok((token.id.as_bytes().to_vec(), encode(token)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let metadata = vec![
            (DIFFICULTY_KEY.as_bytes().to_vec(), encode(&snapshot.difficulty)?),
            (MINING_REWARD_KEY.as_bytes().to_vec(), encode(&snapshot.mining_reward)?),
            (MAX_SUPPLY_KEY.as_bytes().to_vec(), encode(&snapshot.max_supply)?),
            (CIRCULATING_SUPPLY_KEY.as_bytes().to_vec(), encode(&snapshot.circulating_supply)?),
            (SAVED_AT_KEY.as_bytes().to_vec(), encode(&Utc::now().timestamp_millis())?),
        ];

        {
            // stale keys are collected outside the transaction, saves must not interleave
            let _guard = self.save_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let stale_blocks = keys(&self.blocks)?;
            let stale_pending = keys(&self.pending)?;
            let stale_tokens = keys(&self.tokens)?;

            (&self.blocks, &self.pending, &self.tokens, &self.metadata)
                .transaction(
                    |(blocks_tree, pending_tree, tokens_tree, metadata_tree)| -> ConflictableTransactionResult<(), StorageError> {
                        replace_entries(blocks_tree, &stale_blocks, &blocks)?;
                        replace_entries(pending_tree, &stale_pending, &pending)?;
                        replace_entries(tokens_tree, &stale_tokens, &tokens)?;
                        replace_entries(metadata_tree, &[], &metadata)?;
                        Ok(())
                    },
                )
                .map_err(|err: TransactionError<StorageError>| match err {
                    TransactionError::Abort(err) => err,
                    TransactionError::Storage(err) => StorageError::DatabaseError(err),
                })?;
        }

        self.flush()?;
        info!(
            "Blockchain saved: {} blocks, {} pending transactions",
            snapshot.chain.len(),
            snapshot.pending_transactions.len()
        );
        Ok(())
    }

    /// Loads the stored state
    ///
    /// Block hashes and nonces are returned exactly as stored.
    ///
    /// # Returns
    ///
    /// The snapshot, or `NotFound` if nothing was ever saved
    pub fn load_snapshot(&self) -> Result<LedgerSnapshot, StorageError> {
        let chain: Vec<Block> = read_all(&self.blocks)?;
        if chain.is_empty() {
            return Err(StorageError::NotFound("No blocks found in storage".to_string()));
        }

        let pending_transactions: Vec<Transaction> = read_all(&self.pending)?;
        let tokens: Vec<TokenMetadata> = read_all(&self.tokens)?;

        let snapshot = LedgerSnapshot {
            chain,
            pending_transactions,
            difficulty: self.read_metadata(DIFFICULTY_KEY)?.unwrap_or(DEFAULT_DIFFICULTY),
            mining_reward: self.read_metadata(MINING_REWARD_KEY)?.unwrap_or(DEFAULT_MINING_REWARD),
            max_supply: self.read_metadata(MAX_SUPPLY_KEY)?.unwrap_or(DEFAULT_MAX_SUPPLY),
            circulating_supply: self.read_metadata(CIRCULATING_SUPPLY_KEY)?.unwrap_or(0.0),
            tokens,
        };

        info!(
            "Blockchain loaded: {} blocks, {} pending transactions",
            snapshot.chain.len(),
            snapshot.pending_transactions.len()
        );
        Ok(snapshot)
    }

    /// Time of the last save in milliseconds, if any
    pub fn last_saved_at(&self) -> Result<Option<i64>, StorageError> {
        self.read_metadata(SAVED_AT_KEY)
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn read_metadata<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.metadata.get(key)? {
            Some(value) => decode(&value).map(Some),
            None => Ok(None),
        }
    }
}

fn keys(tree: &Tree) -> Result<Vec<IVec>, StorageError> {
    Ok(tree.iter().keys().collect::<Result<Vec<_>, _>>()?)
}

/// Drops `stale` from `tree` and writes `entries` in its place
fn replace_entries(
    tree: &TransactionalTree,
    stale: &[IVec],
    entries: &[(Vec<u8>, Vec<u8>)],
) -> ConflictableTransactionResult<(), StorageError> {
    for key in stale {
        tree.remove(key.clone())?;
    }
    for (key, value) in entries {
        tree.insert(key.as_slice(), value.as_slice())?;
    }
    Ok(())
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::DeserializationError(e.to_string()))
}

/// Reads every value of `tree` in key order
fn read_all<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
    let mut items = Vec::new();

    for result in tree.iter() {
        let (key, value) = result?;
        let item = decode(&value).map_err(|e| {
            StorageError::DeserializationError(format!(
                "entry {}: {}",
                String::from_utf8_lossy(key.as_ref()),
                e
            ))
        })?;
        items.push(item);
    }

    Ok(items)
}
