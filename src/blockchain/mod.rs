// Blockchain module
//
// This module contains the core ledger implementation including:
// - Block structure and proof of work
// - Difficulty retarget
// - Transaction structure and admission rules
// - Custom token registry
// - Persistent storage

pub mod block;
pub mod chain;
pub mod difficulty;
pub mod storage;
pub mod token;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError};
pub use difficulty::{MAX_DIFFICULTY, MIN_DIFFICULTY};
pub use storage::{BlockchainStorage, StorageError};
pub use token::{TokenMetadata, NATIVE_TOKEN};
pub use transaction::{Transaction, TransactionType};
