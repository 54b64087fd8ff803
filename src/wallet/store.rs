//! One custodial wallet per user
//!
//! Rows hold only the address and the encrypted private key. Plaintext keys
//! exist for the duration of `create`/`import` and are wiped before return.

use super::cipher::KeyCipher;
use crate::{Error, Result, UserId};
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// A stored wallet record
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub owner_id: UserId,
    pub address: Address,
    /// base64(nonce || ciphertext || tag) of the 32-byte secp256k1 scalar
    pub encrypted_private_key: String,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("owner_id", &self.owner_id)
            .field("address", &self.address)
            .field("encrypted_private_key", &"[ENCRYPTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Wallet table, optionally backed by a JSON file
///
/// Changes are staged on a copy and only become visible once written.
pub struct WalletStore {
    cipher: Arc<KeyCipher>,
    path: Option<PathBuf>,
    wallets: RwLock<HashMap<UserId, Wallet>>,
}

impl WalletStore {
    /// In-memory store; nothing is written to disk
    pub fn in_memory(cipher: Arc<KeyCipher>) -> Self {
        Self {
            cipher,
            path: None,
            wallets: RwLock::new(HashMap::new()),
        }
    }

    /// Load the table from `path`, or start empty if the file does not exist
    pub async fn open(cipher: Arc<KeyCipher>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let wallets = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let rows: Vec<Wallet> = serde_json::from_str(&content)
                    .map_err(|e| Error::Storage(format!("Corrupt wallet table: {}", e)))?;
                rows.into_iter().map(|w| (w.owner_id, w)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), wallets = wallets.len(), "Wallet store opened");

        Ok(Self {
            cipher,
            path: Some(path),
            wallets: RwLock::new(wallets),
        })
    }

    /// Generate a fresh key pair for `user_id`
    pub async fn create(&self, user_id: UserId) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        if wallets.contains_key(&user_id) {
            return Err(Error::AlreadyExists(format!(
                "User {} already has a wallet",
                user_id
            )));
        }

        let signer = PrivateKeySigner::random();
        let key = Zeroizing::new(signer.to_bytes().0);
        let wallet = self.seal(user_id, signer.address(), key.as_slice())?;

        let mut next = wallets.clone();
        next.insert(user_id, wallet.clone());
        self.persist(&next).await?;
        *wallets = next;

        tracing::info!(user_id, address = %wallet.address, "Wallet created");
        Ok(wallet)
    }

    /// Store an existing key for `user_id`
    ///
    /// Accepts an optional `0x` prefix followed by exactly 64 hex characters
    /// encoding a valid secp256k1 scalar.
    pub async fn import(&self, user_id: UserId, raw_key: &SecretString) -> Result<Wallet> {
        let key = parse_private_key(raw_key)?;
        let signer = PrivateKeySigner::from_slice(key.as_slice())
            .map_err(|_| Error::Validation("Private key is not a valid secp256k1 key".to_string()))?;
        let address = signer.address();

        let mut wallets = self.wallets.write().await;
        if wallets.contains_key(&user_id) {
            return Err(Error::AlreadyExists(format!(
                "User {} already has a wallet",
                user_id
            )));
        }

        let wallet = self.seal(user_id, address, key.as_slice())?;
        let mut next = wallets.clone();
        next.insert(user_id, wallet.clone());
        self.persist(&next).await?;
        *wallets = next;

        tracing::info!(user_id, address = %wallet.address, "Wallet imported");
        Ok(wallet)
    }

    pub async fn get(&self, user_id: UserId) -> Result<Wallet> {
        self.wallets
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No wallet for user {}", user_id)))
    }

    /// Remove the wallet; returns whether one existed
    pub async fn delete(&self, user_id: UserId) -> Result<bool> {
        let mut wallets = self.wallets.write().await;
        if !wallets.contains_key(&user_id) {
            return Ok(false);
        }

        let mut next = wallets.clone();
        next.remove(&user_id);
        self.persist(&next).await?;
        *wallets = next;

        tracing::info!(user_id, "Wallet deleted");
        Ok(true)
    }

    /// Encrypt `key` and verify the stored row decrypts back to `address`
    fn seal(&self, user_id: UserId, address: Address, key: &[u8]) -> Result<Wallet> {
        let encrypted_private_key = self.cipher.encrypt(key)?;

        let check = self.cipher.decrypt(&encrypted_private_key)?;
        let derived = PrivateKeySigner::from_slice(check.as_slice())
            .map_err(|_| Error::Decryption)?
            .address();
        if derived != address {
            return Err(Error::Decryption);
        }

        Ok(Wallet {
            owner_id: user_id,
            address,
            encrypted_private_key,
            created_at: Utc::now(),
        })
    }

    async fn persist(&self, wallets: &HashMap<UserId, Wallet>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut rows: Vec<&Wallet> = wallets.values().collect();
        rows.sort_by_key(|w| w.owner_id);
        let content = serde_json::to_string_pretty(&rows)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn parse_private_key(raw_key: &SecretString) -> Result<Zeroizing<Vec<u8>>> {
    let text = raw_key.expose_secret().trim();
    let hex_text = text.strip_prefix("0x").unwrap_or(text);

    if hex_text.len() != 64 || !hex_text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Validation(
            "Private key must be 64 hex characters, optionally prefixed with 0x".to_string(),
        ));
    }

    alloy::hex::decode(hex_text)
        .map(Zeroizing::new)
        .map_err(|_| Error::Validation("Private key is not valid hex".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::cipher::EncryptionKey;
    use tempfile::TempDir;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn cipher() -> Arc<KeyCipher> {
        Arc::new(KeyCipher::new(EncryptionKey::generate()))
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[tokio::test]
    async fn test_import_derives_known_address() {
        let store = WalletStore::in_memory(cipher());
        let wallet = store.import(7, &secret(TEST_KEY)).await.unwrap();
        assert_eq!(format!("{:?}", wallet.address).to_lowercase(), TEST_ADDRESS);

        // Without the prefix too
        let other = store
            .import(8, &secret(TEST_KEY.trim_start_matches("0x")))
            .await
            .unwrap();
        assert_eq!(other.address, wallet.address);
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_keys() {
        let store = WalletStore::in_memory(cipher());
        let zero = format!("0x{}", "0".repeat(64));
        let over_order = format!("0x{}", "f".repeat(64));
        for bad in ["", "0x1234", "zz", &TEST_KEY[..60], &zero, &over_order] {
            let err = store.import(1, &secret(bad)).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "accepted {:?}", bad);
        }
        assert!(matches!(store.get(1).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_then_duplicate() {
        let store = WalletStore::in_memory(cipher());
        let wallet = store.create(1).await.unwrap();
        assert_ne!(wallet.address, Address::ZERO);

        assert!(matches!(store.create(1).await, Err(Error::AlreadyExists(_))));
        assert!(matches!(
            store.import(1, &secret(TEST_KEY)).await,
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(store.get(1).await.unwrap(), wallet);
    }

    #[tokio::test]
    async fn test_stored_key_is_not_plaintext() {
        let store = WalletStore::in_memory(cipher());
        let wallet = store.import(1, &secret(TEST_KEY)).await.unwrap();
        assert!(!wallet.encrypted_private_key.contains("ac0974bec"));
        assert!(!format!("{:?}", wallet).contains(&wallet.encrypted_private_key));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = WalletStore::in_memory(cipher());
        store.create(3).await.unwrap();

        assert!(store.delete(3).await.unwrap());
        assert!(!store.delete(3).await.unwrap());
        assert!(!store.delete(99).await.unwrap());
        assert!(matches!(store.get(3).await, Err(Error::NotFound(_))));

        // A new wallet can be created after deletion
        store.create(3).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_creates_yield_one_wallet() {
        let store = Arc::new(WalletStore::in_memory(cipher()));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create(5).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_table_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing_dir").join("wallets.json");
        let store = WalletStore::open(cipher(), &path).await.unwrap();

        assert!(store.create(1).await.is_err());
        assert!(matches!(store.get(1).await, Err(Error::NotFound(_))));
        assert!(store.import(1, &secret(TEST_KEY)).await.is_err());
        assert!(matches!(store.get(1).await, Err(Error::NotFound(_))));
        // Retrying reports the write failure again, not a phantom duplicate
        assert!(matches!(store.create(1).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_wallet() {
        let dir = TempDir::new().unwrap();
        let table_dir = dir.path().join("table");
        std::fs::create_dir(&table_dir).unwrap();
        let store = WalletStore::open(cipher(), table_dir.join("wallets.json"))
            .await
            .unwrap();
        let wallet = store.import(4, &secret(TEST_KEY)).await.unwrap();

        std::fs::remove_dir_all(&table_dir).unwrap();
        assert!(store.delete(4).await.is_err());
        assert_eq!(store.get(4).await.unwrap(), wallet);
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallets.json");
        let cipher = cipher();

        let store = WalletStore::open(cipher.clone(), &path).await.unwrap();
        let wallet = store.import(11, &secret(TEST_KEY)).await.unwrap();
        store.create(12).await.unwrap();
        store.delete(12).await.unwrap();
        drop(store);

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(!on_disk.contains("ac0974bec"));

        let reopened = WalletStore::open(cipher, &path).await.unwrap();
        assert_eq!(reopened.get(11).await.unwrap(), wallet);
        assert!(reopened.get(12).await.is_err());
    }
}
