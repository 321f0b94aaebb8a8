use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::block::Block;
use super::transaction::TransactionType;

/// Sentinel id of the chain's built-in token
pub const NATIVE_TOKEN: &str = "NATIVE";

/// Symbol reported for ids the registry has never seen
pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

/// Number of hex characters kept from the token id digest
const TOKEN_ID_LENGTH: usize = 16;

/// Errors that can occur during token registry operations
#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("Token with ID {0} already exists")]
    DuplicateToken(String),
}

/// Describes a custom token created on the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    /// Truncated digest of creator, name, symbol and creation time
    pub id: String,

    /// Human readable name
    pub name: String,

    /// Ticker symbol, always uppercase
    pub symbol: String,

    /// Address that received the initial supply
    pub creator: String,

    /// Amount credited to the creator at genesis
    pub initial_supply: f64,

    /// Creation time in milliseconds since the Unix epoch
    pub created_at: i64,
}

impl TokenMetadata {
    /// Builds the metadata of a token created at `created_at`
    ///
    /// # Arguments
    ///
    /// * `name` - The token name
    /// * `symbol` - The ticker symbol, uppercased on storage
    /// * `initial_supply` - The supply credited to the creator
    /// * `creator` - The creator's address
    /// * `created_at` - The creation time in milliseconds
    ///
    /// # Returns
    ///
    /// The token metadata with its derived id
    pub fn derive(name: &str, symbol: &str, initial_supply: f64, creator: &str, created_at: i64) -> Self {
        TokenMetadata {
            id: token_id(creator, name, symbol, created_at),
            name: name.to_string(),
            symbol: symbol.to_uppercase(),
            creator: creator.to_string(),
            initial_supply,
            created_at,
        }
    }
}

/// Derives a token id from the creation tuple
pub fn token_id(creator: &str, name: &str, symbol: &str, created_at: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-{}-{}-{}", creator, name, symbol, created_at).as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(TOKEN_ID_LENGTH);
    id
}

/// Cache of every custom token known to the node, keyed by token id
///
/// The chain is the source of truth; the registry can be thrown away and
/// rebuilt with [`TokenRegistry::rebuild_from_chain`] at any time.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<String, TokenMetadata>,
}

impl TokenRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        TokenRegistry {
            tokens: HashMap::new(),
        }
    }

    /// Creates a token with an explicit creation time
    ///
    /// Fails with `DuplicateToken` if the derived id is already registered,
    /// which only happens for an identical creator, name, symbol and
    /// millisecond.
    pub fn create_token_at(
        &mut self,
        name: &str,
        symbol: &str,
        initial_supply: f64,
        creator: &str,
        created_at: i64,
    ) -> Result<TokenMetadata, TokenError> {
        let token = TokenMetadata::derive(name, symbol, initial_supply, creator, created_at);

        if self.tokens.contains_key(&token.id) {
            return Err(TokenError::DuplicateToken(token.id));
        }

        self.tokens.insert(token.id.clone(), token.clone());
        Ok(token)
    }

    /// Registers already derived metadata, ignoring ids that are known
    ///
    /// # Returns
    ///
    /// true if the token was not registered before
    pub fn register(&mut self, mut token: TokenMetadata) -> bool {
        if self.tokens.contains_key(&token.id) {
            return false;
        }

        token.symbol = token.symbol.to_uppercase();
        self.tokens.insert(token.id.clone(), token);
        true
    }

    /// Drops every entry and re-registers the tokens created on `chain`
    ///
    /// # Returns
    ///
    /// The number of registered tokens
    pub fn rebuild_from_chain(&mut self, chain: &[Block]) -> usize {
        self.tokens.clear();

        for block in chain {
            self.register_block(block);
        }

        self.tokens.len()
    }

    /// Registers the tokens created by the TOKEN_CREATE transactions of `block`
    pub fn register_block(&mut self, block: &Block) {
        for transaction in &block.transactions {
            if transaction.tx_type != TransactionType::TokenCreate {
                continue;
            }

            if let Some(data) = &transaction.token_data {
                // balances are keyed by the transaction's token id
                let token = TokenMetadata {
                    id: transaction.token_id.clone(),
                    ..data.clone()
                };
                if !self.register(token) {
                    debug!("Token {} already registered, skipping", transaction.token_id);
                }
            }
        }
    }

    /// Gets a token by its id
    pub fn get_token(&self, token_id: &str) -> Option<&TokenMetadata> {
        self.tokens.get(token_id)
    }

    /// Checks if a token exists
    pub fn contains(&self, token_id: &str) -> bool {
        self.tokens.contains_key(token_id)
    }

    /// Gets every registered token, oldest first
    pub fn all_tokens(&self) -> Vec<TokenMetadata> {
        let mut tokens: Vec<TokenMetadata> = self.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tokens
    }

    /// Display symbol of a token id
    pub fn symbol<'a>(&'a self, token_id: &str) -> &'a str {
        if token_id == NATIVE_TOKEN {
            return NATIVE_TOKEN;
        }

        self.tokens
            .get(token_id)
            .map(|token| token.symbol.as_str())
            .unwrap_or(UNKNOWN_SYMBOL)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
