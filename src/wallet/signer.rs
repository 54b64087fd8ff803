//! Transaction signing
//!
//! SECURITY: This is the only place decrypted keys exist after import.
//! - The key is decrypted into a zeroizing buffer scoped to one `sign` call
//! - The derived address must match the stored wallet before anything is signed
//! - Keys are never serialized, logged, or returned

use super::cipher::KeyCipher;
use super::store::Wallet;
use crate::transaction::UnsignedTransaction;
use crate::{Error, Result};
use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Bytes, TxKind, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use std::sync::Arc;

/// An EIP-2718 encoded, signed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_hash: B256,
    pub raw: Bytes,
    /// The transaction that was signed, kept for receipt replay
    pub unsigned: UnsignedTransaction,
}

/// Signs transactions for stored wallets
pub struct SigningEngine {
    cipher: Arc<KeyCipher>,
}

impl SigningEngine {
    pub fn new(cipher: Arc<KeyCipher>) -> Self {
        Self { cipher }
    }

    /// Sign `unsigned` with the wallet's key
    ///
    /// Synchronous: the key never lives across an await point.
    pub fn sign(&self, wallet: &Wallet, unsigned: &UnsignedTransaction) -> Result<SignedTransaction> {
        if unsigned.from != wallet.address {
            return Err(Error::Validation(
                "Transaction sender does not match the wallet".to_string(),
            ));
        }

        let signer = self.unlock(wallet)?;

        let tx = TxEip1559 {
            chain_id: unsigned.chain_id,
            nonce: unsigned.nonce,
            gas_limit: unsigned.gas_limit,
            max_fee_per_gas: unsigned.max_fee_per_gas,
            max_priority_fee_per_gas: unsigned.max_priority_fee_per_gas,
            to: TxKind::Call(unsigned.to),
            value: unsigned.value,
            access_list: Default::default(),
            input: unsigned.data.clone(),
        };

        let signature = signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| Error::Signing(e.to_string()))?;
        drop(signer);

        let envelope = TxEnvelope::from(tx.into_signed(signature));
        let tx_hash = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());

        tracing::info!(
            address = %wallet.address,
            chain_id = unsigned.chain_id,
            nonce = unsigned.nonce,
            tx_hash = %tx_hash,
            "Transaction signed"
        );

        Ok(SignedTransaction {
            tx_hash,
            raw,
            unsigned: unsigned.clone(),
        })
    }

    /// Decrypt the wallet key and check it still derives the stored address
    fn unlock(&self, wallet: &Wallet) -> Result<PrivateKeySigner> {
        let key = self.cipher.decrypt(&wallet.encrypted_private_key)?;
        let signer = PrivateKeySigner::from_slice(key.as_slice()).map_err(|_| Error::Decryption)?;

        if signer.address() != wallet.address {
            tracing::error!(address = %wallet.address, "Decrypted key does not match wallet address");
            return Err(Error::Decryption);
        }
        Ok(signer)
    }
}

// Keep the cipher out of debug output
impl std::fmt::Debug for SigningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningEngine")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}
