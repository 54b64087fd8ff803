//! Error types for the custodial wallet core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Stored key material could not be authenticated under the current key.
    #[error("Wallet key could not be decrypted; re-import the wallet")]
    Decryption,

    #[error("Insufficient {symbol} balance: need {needed}, have {available}")]
    InsufficientBalance {
        symbol: String,
        needed: String,
        available: String,
    },

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Quote expired; request a fresh estimate")]
    QuoteExpired,

    #[error("Swap aggregator error: {0}")]
    Aggregator(String),

    /// Transient failure that survived the local retry budget.
    #[error("Temporarily unavailable: {0}")]
    Rpc(String),

    #[error("Transaction rejected: {0}")]
    RpcRejected(String),

    #[error("Pending action conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition: cannot {action} while {status}")]
    InvalidTransition {
        action: &'static str,
        status: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Rpc(_))
    }

    /// Short, actionable hint rendered under the error in chat replies.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Error::NotFound(_) => Some("Use /create to create a wallet or /import <private_key> to import one."),
            Error::AlreadyExists(_) => Some("Use /delete to remove the current wallet first."),
            Error::Decryption => Some("Delete the wallet with /delete and /import the key again."),
            Error::InsufficientBalance { .. } => {
                Some("Top up the wallet or reduce the amount; remember gas fees.")
            }
            Error::QuoteExpired => Some("Send the /buy or /send command again for a new estimate."),
            Error::Aggregator(_) => Some("Check the token has liquidity on this chain, or try another amount."),
            Error::Rpc(_) => Some("Please try again in a few minutes."),
            Error::Conflict(_) => Some("Use /confirm, /cancel, or /status for the pending action."),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
