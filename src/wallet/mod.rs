//! Custodial wallet management
//!
//! Private keys are encrypted at rest by [`KeyCipher`] and only decrypted
//! inside [`SigningEngine::sign`].

mod cipher;
mod signer;
mod store;

pub use cipher::{EncryptionKey, KeyCipher};
pub use signer::{SignedTransaction, SigningEngine};
pub use store::{Wallet, WalletStore};
