use std::collections::HashMap;

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::block::Block;
use super::difficulty::{adjust_difficulty, MAX_DIFFICULTY, MIN_DIFFICULTY};
use super::storage::StorageError;
use super::token::{TokenError, TokenMetadata, TokenRegistry, NATIVE_TOKEN};
use super::transaction::{Transaction, TransactionError, TransactionType};

/// Difficulty of a fresh chain
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// Native amount minted for each block
pub const DEFAULT_MINING_REWARD: f64 = 4.0;

/// Native supply above which block rewards stop
pub const DEFAULT_MAX_SUPPLY: f64 = 10_000_000.0;

/// Pending transactions taken into one block, the reward comes on top
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 5;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Stale block: {0}")]
    StaleBlock(String),
}

/// A block template waiting for its proof of work
///
/// Jobs are prepared under the ledger lock, mined without it and handed back
/// to [`Blockchain::commit_mined_block`].
#[derive(Debug, Clone)]
pub struct MiningJob {
    /// The block to mine, its last transaction is the reward
    pub block: Block,

    /// Difficulty the block must satisfy
    pub difficulty: u32,

    /// Number of pending transactions the block consumes
    pub included: usize,
}

/// Everything needed to restore a ledger verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub chain: Vec<Block>,
    pub pending_transactions: Vec<Transaction>,
    pub difficulty: u32,
    pub mining_reward: f64,
    pub max_supply: f64,
    pub circulating_supply: f64,
    pub tokens: Vec<TokenMetadata>,
}

/// Represents the ledger: the chain, the pending queue and the accounting
/// derived from them
///
/// The ledger holds no lock of its own. Callers sharing it across threads
/// must serialize every mutation, see `crate::node::Node`.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    chain: Vec<Block>,

    /// Admitted transactions waiting for a block, in arrival order
    pending_transactions: Vec<Transaction>,

    /// Mining difficulty (number of leading zeros required in hash)
    difficulty: u32,

    /// Mining reward
    mining_reward: f64,

    /// Cap on native supply
    max_supply: f64,

    /// Native supply minted so far
    circulating_supply: f64,

    /// Custom tokens seen on the chain
    tokens: TokenRegistry,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new blockchain holding only the genesis block
    pub fn new() -> Self {
        Self::with_parameters(DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD, DEFAULT_MAX_SUPPLY)
    }

    /// Creates a new blockchain with custom economics
    ///
    /// # Arguments
    ///
    /// * `difficulty` - The initial difficulty, clamped to `1..=64`
    /// * `mining_reward` - The reward minted for each block
    /// * `max_supply` - The cap on native supply
    pub fn with_parameters(difficulty: u32, mining_reward: f64, max_supply: f64) -> Self {
        Blockchain {
            chain: vec![Block::genesis()],
            pending_transactions: Vec::new(),
            difficulty: difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY),
            mining_reward,
            max_supply,
            circulating_supply: 0.0,
            tokens: TokenRegistry::new(),
        }
    }

    /// Restores a ledger from a snapshot, trusting the stored block hashes
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, BlockchainError> {
        if snapshot.chain.is_empty() {
            return Err(BlockchainError::InvalidChain("snapshot holds no blocks".to_string()));
        }

        let mut tokens = TokenRegistry::new();
        for token in snapshot.tokens {
            tokens.register(token);
        }
        for block in &snapshot.chain {
            tokens.register_block(block);
        }

        Ok(Blockchain {
            chain: snapshot.chain,
            pending_transactions: snapshot.pending_transactions,
            difficulty: snapshot.difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY),
            mining_reward: snapshot.mining_reward,
            max_supply: snapshot.max_supply,
            circulating_supply: snapshot.circulating_supply,
            tokens,
        })
    }

    /// Captures the full ledger state for persistence
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            chain: self.chain.clone(),
            pending_transactions: self.pending_transactions.clone(),
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
            max_supply: self.max_supply,
            circulating_supply: self.circulating_supply,
            tokens: self.tokens.all_tokens(),
        }
    }

    /// Gets the last block in the chain
    pub fn get_last_block(&self) -> &Block {
        self.chain.last().expect("chain always holds the genesis block")
    }

    /// Admits a transaction into the pending queue
    ///
    /// Rewards, token creations and messages skip the balance check.
    /// Transfers must be covered by the sender's mined balance in the
    /// transaction's token.
    ///
    /// # Arguments
    ///
    /// * `transaction` - The transaction to add
    ///
    /// # Returns
    ///
    /// Ok(()) if the transaction was queued
    pub fn create_transaction(&mut self, transaction: Transaction) -> Result<(), BlockchainError> {
        transaction.validate()?;

        if transaction.tx_type == TransactionType::Transfer {
            if let Some(from) = &transaction.from_address {
                let balance = self.get_balance(from, &transaction.token_id);

                if balance < transaction.amount {
                    return Err(TransactionError::InsufficientBalance {
                        held: balance,
                        required: transaction.amount,
                        symbol: self.tokens.symbol(&transaction.token_id).to_string(),
                    }
                    .into());
                }
            }
        }

        info!(
            "Queued {:?} transaction to {} ({} pending)",
            transaction.tx_type,
            transaction.to_address,
            self.pending_transactions.len() + 1
        );
        self.pending_transactions.push(transaction);
        Ok(())
    }

    /// Registers a new token and queues its genesis transaction
    ///
    /// Nothing is registered or queued unless the genesis transaction is
    /// admissible.
    ///
    /// # Returns
    ///
    /// The metadata of the created token and the queued transaction
    pub fn create_token(
        &mut self,
        name: &str,
        symbol: &str,
        initial_supply: f64,
        creator: &str,
    ) -> Result<(TokenMetadata, Transaction), BlockchainError> {
        let created_at = Utc::now().timestamp_millis();
        let transaction = Transaction::token_create(TokenMetadata::derive(
            name,
            symbol,
            initial_supply,
            creator,
            created_at,
        ));
        transaction.validate()?;

        let token = self
            .tokens
            .create_token_at(name, symbol, initial_supply, creator, created_at)?;
        // token genesis skips the balance check, admission cannot fail past here
        self.create_transaction(transaction.clone())?;
        Ok((token, transaction))
    }

    /// Builds the next block template from the pending queue
    ///
    /// # Returns
    ///
    /// None when there is nothing to mine
    pub fn prepare_mining_job(&self, reward_address: &str) -> Option<MiningJob> {
        if self.pending_transactions.is_empty() {
            info!("No pending transactions to mine");
            return None;
        }

        let reward = if self.circulating_supply + self.mining_reward > self.max_supply {
            warn!("Max supply reached. No mining reward for this block");
            0.0
        } else {
            self.mining_reward
        };

        let included = self.pending_transactions.len().min(MAX_TRANSACTIONS_PER_BLOCK);
        let mut transactions = self.pending_transactions[..included].to_vec();
        transactions.push(Transaction::mining_reward(reward_address, reward));

        let block = Block::new(
            Utc::now().timestamp_millis(),
            transactions,
            self.get_last_block().hash.clone(),
        );

        Some(MiningJob {
            block,
            difficulty: self.difficulty,
            included,
        })
    }

    /// Appends a mined block and settles supply, queue and difficulty
    ///
    /// Fails without touching the ledger if the chain or the pending queue
    /// moved since the job was prepared.
    pub fn commit_mined_block(&mut self, job: MiningJob) -> Result<Block, BlockchainError> {
        let block = job.block;

        if block.previous_hash != self.get_last_block().hash {
            return Err(BlockchainError::StaleBlock(format!(
                "block {} does not extend the current tip",
                block.hash
            )));
        }

        if job.included > self.pending_transactions.len()
            || self.pending_transactions[..job.included] != block.transactions[..job.included]
        {
            return Err(BlockchainError::StaleBlock(
                "pending transactions changed while mining".to_string(),
            ));
        }

        if block.hash != block.calculate_hash() || !block.meets_difficulty(job.difficulty) {
            return Err(BlockchainError::InvalidChain(format!(
                "block {} lacks a valid proof of work",
                block.hash
            )));
        }

        let minted: f64 = block
            .transactions
            .iter()
            .filter(|tx| tx.is_supply_creating())
            .map(|tx| tx.amount)
            .sum();

        self.tokens.register_block(&block);
        self.chain.push(block.clone());
        self.circulating_supply += minted;
        self.pending_transactions.drain(..job.included);
        self.difficulty = adjust_difficulty(&self.chain, self.difficulty);

        info!(
            "Block successfully mined at height {} ({} pending left)",
            self.chain.len() - 1,
            self.pending_transactions.len()
        );
        Ok(block)
    }

    /// Mines the next block in place, blocking until a nonce is found
    ///
    /// # Arguments
    ///
    /// * `reward_address` - The address of the miner (to receive mining reward)
    ///
    /// # Returns
    ///
    /// The newly mined block, or None if nothing was pending
    pub fn mine_pending_transactions(&mut self, reward_address: &str) -> Result<Option<Block>, BlockchainError> {
        let Some(mut job) = self.prepare_mining_job(reward_address) else {
            return Ok(None);
        };

        job.block.mine(job.difficulty);
        self.commit_mined_block(job).map(Some)
    }

    /// Balance of `address` in `token_id`, replayed from genesis
    pub fn get_balance(&self, address: &str, token_id: &str) -> f64 {
        self.chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .map(|tx| tx.balance_delta(address, token_id))
            .sum()
    }

    /// Native balance plus every registered token the address holds
    pub fn get_all_token_balances(&self, address: &str) -> HashMap<String, f64> {
        let mut balances = HashMap::new();
        balances.insert(NATIVE_TOKEN.to_string(), self.get_balance(address, NATIVE_TOKEN));

        for token in self.tokens.all_tokens() {
            let balance = self.get_balance(address, &token.id);
            if balance != 0.0 {
                balances.insert(token.id, balance);
            }
        }

        balances
    }

    /// Validates the hash chain
    ///
    /// # Returns
    ///
    /// true if every block's stored hash matches its content and links to
    /// its predecessor
    pub fn is_chain_valid(&self) -> bool {
        self.chain.windows(2).all(|pair| {
            let (previous, current) = (&pair[0], &pair[1]);
            current.hash == current.calculate_hash() && current.previous_hash == previous.hash
        })
    }

    /// Swaps in a chain accepted from a peer
    ///
    /// Pending transactions are kept. The token registry is rebuilt from the
    /// new chain.
    pub fn replace_chain(&mut self, chain: Vec<Block>, circulating_supply: f64) {
        self.chain = chain;
        self.circulating_supply = circulating_supply;
        self.tokens.rebuild_from_chain(&self.chain);
    }

    /// Gets the entire blockchain
    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Gets all pending transactions
    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    pub fn get_token_registry(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Overrides the difficulty, clamped to `1..=64`
    ///
    /// A hash has 64 hex digits, so no larger target can be met.
    pub fn set_difficulty(&mut self, difficulty: u32) {
        self.difficulty = difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
    }

    pub fn mining_reward(&self) -> f64 {
        self.mining_reward
    }

    pub fn max_supply(&self) -> f64 {
        self.max_supply
    }

    pub fn circulating_supply(&self) -> f64 {
        self.circulating_supply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_message(blockchain: &mut Blockchain) {
        blockchain
            .create_transaction(Transaction::message("someone", "anyone", "hello"))
            .unwrap();
    }

    fn fund(blockchain: &mut Blockchain, address: &str) {
        queue_message(blockchain);
        blockchain.mine_pending_transactions(address).unwrap().unwrap();
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = Blockchain::new();

        assert_eq!(blockchain.chain().len(), 1);
        assert_eq!(blockchain.chain()[0], Block::genesis());
        assert_eq!(blockchain.get_balance("anyone", NATIVE_TOKEN), 0.0);
        assert_eq!(blockchain.difficulty(), DEFAULT_DIFFICULTY);
        assert!(blockchain.is_chain_valid());
    }

    #[test]
    fn test_mine_credits_reward() {
        let mut blockchain = Blockchain::new();
        fund(&mut blockchain, "A");

        assert_eq!(blockchain.get_balance("A", NATIVE_TOKEN), 4.0);
        assert_eq!(blockchain.circulating_supply(), 4.0);
        assert_eq!(blockchain.chain().len(), 2);
        assert!(blockchain.pending_transactions().is_empty());

        let block = blockchain.get_last_block();
        assert!(block.meets_difficulty(DEFAULT_DIFFICULTY));
        assert_eq!(block.previous_hash, blockchain.chain()[0].hash);
        assert_eq!(block.transactions.last().unwrap().tx_type, TransactionType::MiningReward);
    }

    #[test]
    fn test_mine_without_pending_is_noop() {
        let mut blockchain = Blockchain::new();

        assert!(blockchain.mine_pending_transactions("A").unwrap().is_none());
        assert_eq!(blockchain.chain().len(), 1);
        assert_eq!(blockchain.circulating_supply(), 0.0);
    }

    #[test]
    fn test_insufficient_balance() {
        let mut blockchain = Blockchain::new();

        let err = blockchain
            .create_transaction(Transaction::transfer("A", "B", 100.0))
            .unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::Transaction(TransactionError::InsufficientBalance { held, required, ref symbol })
                if held == 0.0 && required == 100.0 && symbol == "NATIVE"
        ));
        assert_eq!(err.to_string(), "Insufficient balance. Have 0 NATIVE, need 100 NATIVE");
        assert!(blockchain.pending_transactions().is_empty());

        fund(&mut blockchain, "A");
        blockchain
            .create_transaction(Transaction::transfer("A", "B", 3.0))
            .unwrap();
        assert_eq!(blockchain.pending_transactions().len(), 1);
    }

    #[test]
    fn test_balance_ignores_pending() {
        let mut blockchain = Blockchain::new();
        fund(&mut blockchain, "A");

        blockchain.create_transaction(Transaction::transfer("A", "B", 3.0)).unwrap();
        assert_eq!(blockchain.get_balance("B", NATIVE_TOKEN), 0.0);

        blockchain.mine_pending_transactions("M").unwrap().unwrap();
        assert_eq!(blockchain.get_balance("A", NATIVE_TOKEN), 1.0);
        assert_eq!(blockchain.get_balance("B", NATIVE_TOKEN), 3.0);
        assert_eq!(blockchain.get_balance("M", NATIVE_TOKEN), 4.0);
    }

    #[test]
    fn test_token_create_requires_data() {
        let mut blockchain = Blockchain::new();
        let mut transaction = Transaction::token_create(TokenMetadata::derive("Gold", "GLD", 1.0, "A", 0));
        transaction.token_data = None;

        let err = blockchain.create_transaction(transaction).unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::Transaction(TransactionError::Validation(ref msg)) if msg == "missing token data"
        ));
    }

    #[test]
    fn test_block_takes_first_five_pending() {
        let mut blockchain = Blockchain::new();
        for i in 0..7 {
            blockchain
                .create_transaction(Transaction::message("A", "B", format!("message {}", i)))
                .unwrap();
        }

        let block = blockchain.mine_pending_transactions("M").unwrap().unwrap();

        assert_eq!(block.transactions.len(), MAX_TRANSACTIONS_PER_BLOCK + 1);
        assert_eq!(block.transactions[0].message, "message 0");
        assert_eq!(block.transactions[4].message, "message 4");
        let pending: Vec<&str> = blockchain
            .pending_transactions()
            .iter()
            .map(|tx| tx.message.as_str())
            .collect();
        assert_eq!(pending, vec!["message 5", "message 6"]);
    }

    #[test]
    fn test_supply_cap_zeroes_reward() {
        let mut blockchain = Blockchain::with_parameters(1, 4.0, 6.0);

        fund(&mut blockchain, "A");
        assert_eq!(blockchain.circulating_supply(), 4.0);

        fund(&mut blockchain, "A");
        assert_eq!(blockchain.circulating_supply(), 4.0);
        assert_eq!(blockchain.get_balance("A", NATIVE_TOKEN), 4.0);
        assert_eq!(blockchain.get_last_block().transactions.last().unwrap().amount, 0.0);
        // the configured reward itself is untouched
        assert_eq!(blockchain.mining_reward(), 4.0);
    }

    #[test]
    fn test_chain_validity() {
        let mut blockchain = Blockchain::new();
        blockchain.create_transaction(Transaction::message("A", "B", "hi")).unwrap();
        fund(&mut blockchain, "A");
        assert!(blockchain.is_chain_valid());

        let mut tampered = blockchain.clone();
        tampered.chain[1].transactions[0].amount = 1.0;
        assert!(!tampered.is_chain_valid());

        let mut relinked = blockchain.clone();
        relinked.chain[1].previous_hash = "0".to_string();
        relinked.chain[1].hash = relinked.chain[1].calculate_hash();
        assert!(!relinked.is_chain_valid());
    }

    #[test]
    fn test_balance_matches_replay() {
        let mut blockchain = Blockchain::new();
        fund(&mut blockchain, "A");
        fund(&mut blockchain, "B");
        blockchain.create_transaction(Transaction::transfer("A", "B", 1.5)).unwrap();
        blockchain.create_transaction(Transaction::transfer("B", "A", 0.5)).unwrap();
        blockchain.mine_pending_transactions("A").unwrap().unwrap();

        for address in ["A", "B", "someone"] {
            let mut expected = 0.0;
            for tx in blockchain.chain().iter().flat_map(|b| b.transactions.iter()) {
                if tx.token_id != NATIVE_TOKEN {
                    continue;
                }
                if tx.from_address.as_deref() == Some(address) {
                    expected -= tx.amount;
                }
                if tx.to_address == address {
                    expected += tx.amount;
                }
            }
            assert_eq!(blockchain.get_balance(address, NATIVE_TOKEN), expected);
        }
        assert_eq!(blockchain.get_balance("A", NATIVE_TOKEN), 7.0);
        assert_eq!(blockchain.get_balance("B", NATIVE_TOKEN), 5.0);
    }

    #[test]
    fn test_custom_token_flow() {
        let mut blockchain = Blockchain::new();
        let (token, _) = blockchain.create_token("Gold", "gld", 1000.0, "A").unwrap();
        assert_eq!(blockchain.pending_transactions().len(), 1);

        blockchain.mine_pending_transactions("M").unwrap().unwrap();

        // repeated balance scans never register the token twice
        assert_eq!(blockchain.get_balance("A", &token.id), 1000.0);
        assert_eq!(blockchain.get_balance("A", &token.id), 1000.0);
        assert_eq!(blockchain.get_token_registry().len(), 1);
        assert_eq!(blockchain.get_token_registry().symbol(&token.id), "GLD");

        let balances = blockchain.get_all_token_balances("A");
        assert_eq!(balances.get(NATIVE_TOKEN), Some(&0.0));
        assert_eq!(balances.get(&token.id), Some(&1000.0));
        assert!(!blockchain.get_all_token_balances("B").contains_key(&token.id));

        // token genesis counts toward supply like the block reward
        assert_eq!(blockchain.circulating_supply(), 1004.0);

        let err = blockchain
            .create_transaction(Transaction::transfer("B", "A", 1.0).with_token(token.id.clone()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Insufficient balance. Have 0 GLD, need 1 GLD");

        blockchain
            .create_transaction(Transaction::transfer("A", "B", 250.0).with_token(token.id.clone()))
            .unwrap();
        blockchain.mine_pending_transactions("M").unwrap().unwrap();
        assert_eq!(blockchain.get_balance("B", &token.id), 250.0);
        assert_eq!(blockchain.get_balance("A", &token.id), 750.0);
    }

    #[test]
    fn test_supply_matches_replay() {
        let mut blockchain = Blockchain::new();
        blockchain.create_token("Gold", "GLD", 50.0, "A").unwrap();
        fund(&mut blockchain, "A");
        blockchain.create_token("Silver", "SLV", 7.5, "B").unwrap();
        fund(&mut blockchain, "B");

        let replayed: f64 = blockchain
            .chain()
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| tx.from_address.is_none())
            .map(|tx| tx.amount)
            .sum();
        assert_eq!(replayed, 65.5);
        assert_eq!(blockchain.circulating_supply(), replayed);
    }

    #[test]
    fn test_invalid_token_leaves_no_trace() {
        let mut blockchain = Blockchain::new();

        for supply in [-5.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = blockchain.create_token("Bad", "BAD", supply, "A").unwrap_err();
            assert!(matches!(err, BlockchainError::Transaction(TransactionError::Validation(_))));
            assert!(blockchain.get_token_registry().is_empty());
            assert!(blockchain.pending_transactions().is_empty());
        }

        // a valid token under the same name still goes through
        blockchain.create_token("Bad", "BAD", 5.0, "A").unwrap();
        assert_eq!(blockchain.get_token_registry().len(), 1);
        assert_eq!(blockchain.pending_transactions().len(), 1);
    }

    #[test]
    fn test_admission_by_type() {
        let token = TokenMetadata::derive("Gold", "GLD", 100.0, "nobody", 0);
        let cases = [
            (Transaction::mining_reward("nobody", 4.0), true),
            (Transaction::token_create(token), true),
            (Transaction::message("nobody", "B", "hi"), true),
            (Transaction::transfer("nobody", "B", 1.0), false),
        ];

        let mut blockchain = Blockchain::new();
        let mut queued = 0;
        for (transaction, admitted) in cases {
            let tx_type = transaction.tx_type;
            let result = blockchain.create_transaction(transaction);
            if admitted {
                assert!(result.is_ok(), "{:?} should be admitted", tx_type);
                queued += 1;
            } else {
                assert!(
                    matches!(
                        result,
                        Err(BlockchainError::Transaction(TransactionError::InsufficientBalance { .. }))
                    ),
                    "{:?} should be refused",
                    tx_type
                );
            }
            assert_eq!(blockchain.pending_transactions().len(), queued);
        }
        assert_eq!(queued, 3);
    }

    #[test]
    fn test_difficulty_is_capped() {
        let mut blockchain = Blockchain::new();

        blockchain.set_difficulty(u32::MAX);
        assert_eq!(blockchain.difficulty(), MAX_DIFFICULTY);
        blockchain.set_difficulty(65);
        assert_eq!(blockchain.difficulty(), 64);
        blockchain.set_difficulty(0);
        assert_eq!(blockchain.difficulty(), MIN_DIFFICULTY);

        assert_eq!(Blockchain::with_parameters(1_000, 4.0, 6.0).difficulty(), MAX_DIFFICULTY);

        let mut snapshot = Blockchain::new().snapshot();
        snapshot.difficulty = u32::MAX;
        assert_eq!(Blockchain::from_snapshot(snapshot).unwrap().difficulty(), MAX_DIFFICULTY);
    }

    #[test]
    fn test_mining_past_extreme_peer_timestamp() {
        let mut blockchain = Blockchain::with_parameters(1, 4.0, DEFAULT_MAX_SUPPLY);
        for _ in 0..5 {
            fund(&mut blockchain, "A");
        }

        // a peer chain whose block 5 carries the smallest timestamp there is
        let mut chain = blockchain.chain().to_vec();
        chain[5].timestamp = i64::MIN;
        chain[5].hash = chain[5].calculate_hash();
        let supply = blockchain.circulating_supply();
        blockchain.replace_chain(chain, supply);

        // the next boundary compares block 5 against block 9
        for _ in 0..4 {
            fund(&mut blockchain, "A");
        }
        assert_eq!(blockchain.chain().len(), 10);
        assert_eq!(blockchain.difficulty(), 1);
    }

    #[test]
    fn test_stale_job_is_refused() {
        let mut blockchain = Blockchain::new();
        queue_message(&mut blockchain);
        queue_message(&mut blockchain);

        let mut job = blockchain.prepare_mining_job("A").unwrap();
        job.block.mine(job.difficulty);

        // another block lands first
        blockchain.mine_pending_transactions("B").unwrap().unwrap();

        let err = blockchain.commit_mined_block(job).unwrap_err();
        assert!(matches!(err, BlockchainError::StaleBlock(_)));
        assert_eq!(blockchain.chain().len(), 2);
    }

    #[test]
    fn test_difficulty_retargets_while_mining() {
        let mut blockchain = Blockchain::with_parameters(1, 4.0, DEFAULT_MAX_SUPPLY);
        for _ in 0..9 {
            fund(&mut blockchain, "A");
        }

        // ten blocks mined in well under 25 seconds
        assert_eq!(blockchain.chain().len(), 10);
        assert_eq!(blockchain.difficulty(), 2);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut blockchain = Blockchain::new();
        blockchain.create_token("Gold", "GLD", 10.0, "A").unwrap();
        fund(&mut blockchain, "A");
        queue_message(&mut blockchain);

        let snapshot = blockchain.snapshot();
        let restored = Blockchain::from_snapshot(snapshot.clone()).unwrap();

        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.get_token_registry().len(), 1);
        assert!(restored.is_chain_valid());
    }

    #[test]
    fn test_snapshot_trusts_stored_hashes() {
        let mut blockchain = Blockchain::new();
        fund(&mut blockchain, "A");

        let mut snapshot = blockchain.snapshot();
        snapshot.chain[1].nonce += 1;
        let restored = Blockchain::from_snapshot(snapshot.clone()).unwrap();

        assert_eq!(restored.chain()[1].hash, snapshot.chain[1].hash);
        assert!(!restored.is_chain_valid());
    }

    #[test]
    fn test_empty_snapshot_rejected() {
        let mut snapshot = Blockchain::new().snapshot();
        snapshot.chain.clear();

        assert!(matches!(
            Blockchain::from_snapshot(snapshot),
            Err(BlockchainError::InvalidChain(_))
        ));
    }
}
