use serde::{Deserialize, Serialize};

use crate::blockchain::{Block, Transaction};

/// Envelope exchanged between peers, tagged by its `type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum P2PMessage {
    /// The sender's full chain, genesis first
    Chain { chain: Vec<Block> },

    /// A transaction the sender admitted. Receivers only log it; peers learn
    /// about transactions once they are mined into a longer chain.
    Transaction { transaction: Transaction },
}

impl P2PMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
