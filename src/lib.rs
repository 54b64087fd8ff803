//! Custodial EVM Wallet Bot
//!
//! Wallet core for a chat bot:
//! - Create or import one wallet per user, keys encrypted at rest
//! - Query native and token balances across EVM chains
//! - Buy tokens via the Odos aggregator and send native or ERC-20 transfers
//! - Every transaction goes through an estimate -> confirm -> execute flow
//!
//! # Security Model
//!
//! - Private keys are stored AES-256-GCM encrypted under one process-wide key
//! - Plaintext keys exist only inside a single signing call, then are zeroized
//! - The signing key must re-derive the stored address before anything is signed
//! - Full audit trail of wallet and transaction events, without key material

pub mod amount;
pub mod app;
pub mod audit;
pub mod balance;
pub mod chains;
pub mod commands;
pub mod config;
pub mod flow;
pub mod rpc;
pub mod swap;
pub mod tokens;
pub mod transaction;
pub mod wallet;

mod error;

/// Chat platform user identifier
pub type UserId = i64;

// Re-export commonly used types
pub use app::WalletBot;
pub use commands::{Command, CommandDispatcher, CommandOutcome};
pub use config::{Config, RpcConfig, WALLET_ENCRYPTION_KEY_ENV};
pub use error::{Error, Result};
