use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use thiserror::Error;

use crate::blockchain::{
    Block, Blockchain, BlockchainError, BlockchainStorage, StorageError, TokenMetadata, Transaction,
};
use crate::p2p::sync::{self, SyncOutcome};

/// Errors that can occur while driving the node
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Blockchain(#[from] BlockchainError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Mining abandoned: a longer chain was accepted")]
    MiningAborted,

    #[error("Mining worker failed: {0}")]
    Worker(String),
}

/// A single ledger shared by the HTTP shell, the miner and the peers
///
/// Every mutation of the ledger goes through one mutex. Proof of work runs
/// on a blocking worker outside that mutex and is abandoned when a longer
/// chain from a peer is accepted in the meantime.
#[derive(Debug)]
pub struct Node {
    ledger: Mutex<Blockchain>,

    /// Raised when the chain is replaced, polled by the mining worker
    abort_mining: Arc<AtomicBool>,

    /// Set while a nonce search is running
    mining: AtomicBool,

    /// Serializes mining rounds
    mining_lock: tokio::sync::Mutex<()>,

    storage: Option<Arc<BlockchainStorage>>,
}

impl Node {
    /// Creates a node around an existing ledger
    pub fn new(blockchain: Blockchain, storage: Option<Arc<BlockchainStorage>>) -> Self {
        Node {
            ledger: Mutex::new(blockchain),
            abort_mining: Arc::new(AtomicBool::new(false)),
            mining: AtomicBool::new(false),
            mining_lock: tokio::sync::Mutex::new(()),
            storage,
        }
    }

    /// Creates a node backed by the storage at `path`
    ///
    /// Restores the saved ledger if there is one, otherwise starts from
    /// genesis and saves it right away.
    pub fn with_storage<P: AsRef<Path>>(path: P) -> Result<Self, NodeError> {
        let storage = Arc::new(BlockchainStorage::new(path)?);

        let blockchain = match storage.load_snapshot() {
            Ok(snapshot) => {
                if let Some(saved_at) = storage.last_saved_at()? {
                    info!(
                        "Restoring {} blocks saved at {}",
                        snapshot.chain.len(),
                        chrono::DateTime::from_timestamp_millis(saved_at)
                            .map(|time| time.to_rfc3339())
                            .unwrap_or_else(|| saved_at.to_string())
                    );
                }
                Blockchain::from_snapshot(snapshot)?
            }
            Err(StorageError::NotFound(_)) => {
                info!("No saved blockchain found, starting fresh");
                let blockchain = Blockchain::new();
                storage.save_snapshot(&blockchain.snapshot())?;
                blockchain
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self::new(blockchain, Some(storage)))
    }

    fn ledger(&self) -> MutexGuard<'_, Blockchain> {
        // a panic while holding the lock never leaves the ledger half-written:
        // every mutation is applied after its checks pass
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` against the ledger under the node lock
    pub fn with_ledger<R>(&self, f: impl FnOnce(&Blockchain) -> R) -> R {
        f(&self.ledger())
    }

    /// Gets a copy of the chain
    pub fn chain(&self) -> Vec<Block> {
        self.ledger().chain().to_vec()
    }

    pub fn create_transaction(&self, transaction: Transaction) -> Result<(), BlockchainError> {
        self.ledger().create_transaction(transaction)
    }

    pub fn create_token(
        &self,
        name: &str,
        symbol: &str,
        initial_supply: f64,
        creator: &str,
    ) -> Result<(TokenMetadata, Transaction), BlockchainError> {
        self.ledger().create_token(name, symbol, initial_supply, creator)
    }

    pub fn set_difficulty(&self, difficulty: u32) {
        let mut ledger = self.ledger();
        ledger.set_difficulty(difficulty);
        info!("Difficulty set to {}", ledger.difficulty());
    }

    /// Checks if a nonce search is in progress
    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }

    /// Mines the pending transactions into a new block
    ///
    /// Only one round runs at a time; concurrent callers wait for it. The
    /// ledger stays available to other callers while the nonce search runs.
    ///
    /// # Arguments
    ///
    /// * `reward_address` - The address of the miner (to receive mining reward)
    ///
    /// # Returns
    ///
    /// The newly mined block, or None if nothing was pending
    pub async fn mine(&self, reward_address: &str) -> Result<Option<Block>, NodeError> {
        let _round = self.mining_lock.lock().await;

        let job = {
            let ledger = self.ledger();
            let Some(job) = ledger.prepare_mining_job(reward_address) else {
                return Ok(None);
            };
            // ordered against receive_chain by the ledger lock
            self.abort_mining.store(false, Ordering::SeqCst);
            self.mining.store(true, Ordering::SeqCst);
            job
        };

        let abort = self.abort_mining.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let mut job = job;
            let found = job.block.mine_cancellable(job.difficulty, &abort);
            (job, found)
        })
        .await;
        self.mining.store(false, Ordering::SeqCst);

        let (job, found) = worker.map_err(|e| NodeError::Worker(e.to_string()))?;
        if !found {
            warn!("Mining abandoned, the chain was replaced by a peer");
            return Err(NodeError::MiningAborted);
        }

        let block = self.ledger().commit_mined_block(job)?;
        if let Err(err) = self.save() {
            warn!("Failed to save blockchain after mining: {}", err);
        }

        Ok(Some(block))
    }

    /// Offers a chain received from a peer to the ledger
    ///
    /// An accepted chain aborts any mining round in progress.
    pub fn receive_chain(&self, candidate: Vec<Block>) -> SyncOutcome {
        let outcome = {
            let mut ledger = self.ledger();
            let outcome = sync::receive_chain(&mut ledger, candidate);
            if outcome == SyncOutcome::Replaced {
                self.abort_mining.store(true, Ordering::SeqCst);
            }
            outcome
        };

        if outcome == SyncOutcome::Replaced {
            if let Err(err) = self.save() {
                warn!("Failed to save blockchain after chain replacement: {}", err);
            }
        }

        outcome
    }

    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Writes the ledger to storage, a no-op for in-memory nodes
    pub fn save(&self) -> Result<(), NodeError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let snapshot = self.ledger().snapshot();
        storage.save_snapshot(&snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::blockchain::NATIVE_TOKEN;

    fn longer_chain(blocks: usize) -> Vec<Block> {
        let mut ledger = Blockchain::new();
        for _ in 0..blocks {
            ledger
                .create_transaction(Transaction::message("B", "C", "hi"))
                .unwrap();
            ledger.mine_pending_transactions("B").unwrap().unwrap();
        }
        ledger.chain().to_vec()
    }

    #[tokio::test]
    async fn test_mine() {
        let node = Node::new(Blockchain::new(), None);
        node.create_transaction(Transaction::message("A", "B", "hello"))
            .unwrap();

        let block = node.mine("A").await.unwrap().unwrap();

        assert_eq!(node.chain().len(), 2);
        assert_eq!(node.chain()[1], block);
        node.with_ledger(|ledger| {
            assert_eq!(ledger.get_balance("A", NATIVE_TOKEN), 4.0);
            assert!(ledger.pending_transactions().is_empty());
            assert!(ledger.is_chain_valid());
        });
    }

    #[tokio::test]
    async fn test_mine_without_pending() {
        let node = Node::new(Blockchain::new(), None);

        assert!(node.mine("A").await.unwrap().is_none());
        assert_eq!(node.chain().len(), 1);
    }

    #[tokio::test]
    async fn test_longer_chain_aborts_mining() {
        let node = Arc::new(Node::new(Blockchain::new(), None));
        node.create_transaction(Transaction::message("A", "B", "never mined"))
            .unwrap();
        // unreachable target, only the abort flag can end this round
        node.set_difficulty(64);

        let miner = {
            let node = node.clone();
            tokio::spawn(async move { node.mine("A").await })
        };
        while !node.is_mining() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(node.receive_chain(longer_chain(2)), SyncOutcome::Replaced);

        let result = tokio::time::timeout(Duration::from_secs(10), miner)
            .await
            .expect("miner stops after the abort")
            .unwrap();
        assert!(matches!(result, Err(NodeError::MiningAborted)));
        assert_eq!(node.chain().len(), 3);
        node.with_ledger(|ledger| assert_eq!(ledger.pending_transactions().len(), 1));
    }

    #[tokio::test]
    async fn test_admission_while_mining() {
        let node = Arc::new(Node::new(Blockchain::new(), None));
        node.create_transaction(Transaction::message("A", "B", "first"))
            .unwrap();
        node.set_difficulty(64);

        let miner = {
            let node = node.clone();
            tokio::spawn(async move { node.mine("A").await })
        };
        while !node.is_mining() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // the ledger lock is free while the nonce search runs
        node.create_transaction(Transaction::message("A", "B", "second"))
            .unwrap();
        node.with_ledger(|ledger| assert_eq!(ledger.pending_transactions().len(), 2));

        node.receive_chain(longer_chain(1));
        let result = miner.await.unwrap();
        assert!(matches!(result, Err(NodeError::MiningAborted)));
    }

    #[tokio::test]
    async fn test_storage_follows_ledger() {
        let storage = Arc::new(BlockchainStorage::temporary().unwrap());
        let node = Node::new(Blockchain::new(), Some(storage.clone()));
        node.create_transaction(Transaction::message("A", "B", "hello"))
            .unwrap();

        node.mine("A").await.unwrap().unwrap();
        assert_eq!(storage.load_snapshot().unwrap().chain.len(), 2);

        node.receive_chain(longer_chain(3));
        let saved = storage.load_snapshot().unwrap();
        assert_eq!(saved.chain.len(), 4);
        assert_eq!(saved.circulating_supply, 12.0);
    }

    #[test]
    fn test_shorter_chain_keeps_state() {
        let node = Node::new(Blockchain::new(), None);

        assert_eq!(node.receive_chain(vec![Block::genesis()]), SyncOutcome::NotLonger);
        assert_eq!(node.chain().len(), 1);
    }
}
