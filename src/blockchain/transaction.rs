use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::token::{TokenMetadata, NATIVE_TOKEN};

/// Errors that can occur when a transaction is submitted to the ledger
#[derive(Debug, Error, PartialEq)]
pub enum TransactionError {
    #[error("Invalid transaction: {0}")]
    Validation(String),

    #[error("Insufficient balance. Have {held} {symbol}, need {required} {symbol}")]
    InsufficientBalance {
        held: f64,
        required: f64,
        symbol: String,
    },
}

/// Kind of a ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Moves value from one address to another
    #[default]
    Transfer,
    /// Free text message, never balance checked
    Message,
    /// Genesis of a custom token
    TokenCreate,
    /// Block reward minted by the miner
    MiningReward,
}

/// Represents a transaction in the ledger
///
/// Addresses are plain strings. A missing `from_address` marks value minted
/// out of nothing (block rewards and token genesis).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Sender's address, none for minted value
    pub from_address: Option<String>,

    /// Recipient's address
    pub to_address: String,

    /// Amount being transferred
    pub amount: f64,

    /// Free text attached to the transaction
    #[serde(default)]
    pub message: String,

    /// Transaction kind
    #[serde(rename = "type", default)]
    pub tx_type: TransactionType,

    /// Token the amount is denominated in
    #[serde(default = "default_token_id")]
    pub token_id: String,

    /// Token metadata, only carried by TOKEN_CREATE transactions
    #[serde(default)]
    pub token_data: Option<TokenMetadata>,

    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

fn default_token_id() -> String {
    NATIVE_TOKEN.to_string()
}

impl Transaction {
    /// Creates a native token transfer
    ///
    /// # Arguments
    ///
    /// * `from` - The address of the sender
    /// * `to` - The address of the recipient
    /// * `amount` - The amount to transfer
    ///
    /// # Returns
    ///
    /// A new Transaction instance
    pub fn transfer(from: impl Into<String>, to: impl Into<String>, amount: f64) -> Self {
        Transaction {
            from_address: Some(from.into()),
            to_address: to.into(),
            amount,
            message: String::new(),
            tx_type: TransactionType::Transfer,
            token_id: default_token_id(),
            token_data: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Creates a message transaction carrying no value
    pub fn message(from: impl Into<String>, to: impl Into<String>, message: impl Into<String>) -> Self {
        Transaction {
            message: message.into(),
            tx_type: TransactionType::Message,
            ..Transaction::transfer(from, to, 0.0)
        }
    }

    /// Creates a block reward for a miner
    ///
    /// # Arguments
    ///
    /// * `recipient` - The address of the miner
    /// * `amount` - The reward amount
    ///
    /// # Returns
    ///
    /// A new Transaction instance
    pub fn mining_reward(recipient: impl Into<String>, amount: f64) -> Self {
        Transaction {
            from_address: None,
            to_address: recipient.into(),
            amount,
            message: "Mining reward".to_string(),
            tx_type: TransactionType::MiningReward,
            token_id: default_token_id(),
            token_data: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Creates the genesis transaction of a custom token, crediting the
    /// whole initial supply to its creator
    pub fn token_create(token: TokenMetadata) -> Self {
        Transaction {
            from_address: None,
            to_address: token.creator.clone(),
            amount: token.initial_supply,
            message: format!("Token created: {} ({})", token.name, token.symbol),
            tx_type: TransactionType::TokenCreate,
            token_id: token.id.clone(),
            token_data: Some(token),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Denominates the transaction in another token
    pub fn with_token(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = token_id.into();
        self
    }

    /// Attaches a free text message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Checks the shape of the transaction, independent of any ledger state
    pub fn validate(&self) -> Result<(), TransactionError> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(TransactionError::Validation(format!(
                "amount must be a non-negative number, got {}",
                self.amount
            )));
        }

        match self.tx_type {
            TransactionType::TokenCreate if self.token_data.is_none() => Err(
                TransactionError::Validation("missing token data".to_string()),
            ),
            TransactionType::Transfer if self.from_address.is_none() => Err(
                TransactionError::Validation("transfer requires a sender address".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Checks if the transaction creates supply out of nothing
    ///
    /// Block rewards and token genesis both have no sender and both count
    /// toward the circulating supply.
    pub fn is_supply_creating(&self) -> bool {
        self.from_address.is_none()
    }

    /// Signed effect of this transaction on `address` for `token_id`
    pub fn balance_delta(&self, address: &str, token_id: &str) -> f64 {
        if self.token_id != token_id {
            return 0.0;
        }

        let mut delta = 0.0;
        if self.from_address.as_deref() == Some(address) {
            delta -= self.amount;
        }
        if self.to_address == address {
            delta += self.amount;
        }
        delta
    }
}
