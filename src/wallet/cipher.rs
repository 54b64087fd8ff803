//! Encryption of private keys at rest
//!
//! AES-256-GCM under one process-wide key. Ciphertexts are stored as
//! base64(`nonce || ciphertext || tag`) with a fresh 96-bit nonce per message.
//! Authentication is checked before any plaintext is returned, so a corrupted
//! row or a ciphertext from another key fails with [`Error::Decryption`].
//!
//! There is no key versioning: changing the key makes every stored wallet
//! undecryptable.

use crate::{Error, Result};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::io::Write;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// The process-wide encryption key, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LEN],
}

impl EncryptionKey {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Fresh key from the OS CSPRNG
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let generated = Self { key };
        key.zeroize();
        generated
    }

    /// Parse a key given as 64 hex chars (optional 0x) or base64 of 32 bytes
    pub fn parse(encoded: &SecretString) -> Result<Self> {
        let text = encoded.expose_secret().trim();
        let hex_text = text.strip_prefix("0x").unwrap_or(text);

        let bytes = if hex_text.len() == KEY_LEN * 2 {
            alloy::hex::decode(hex_text).ok()
        } else {
            STANDARD
                .decode(text)
                .or_else(|_| URL_SAFE.decode(text))
                .ok()
        };
        let bytes = Zeroizing::new(bytes.ok_or_else(|| {
            Error::Config("Encryption key must be 64 hex chars or base64 of 32 bytes".to_string())
        })?);

        if bytes.len() != KEY_LEN {
            return Err(Error::Config(format!(
                "Encryption key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        let parsed = Self { key };
        key.zeroize();
        Ok(parsed)
    }

    /// Base64 form suitable for WALLET_ENCRYPTION_KEY or the key file
    pub fn to_base64(&self) -> SecretString {
        SecretString::from(STANDARD.encode(self.key))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Authenticated encryption of key material
#[derive(Debug)]
pub struct KeyCipher {
    key: EncryptionKey,
}

impl KeyCipher {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Load the process-wide key
    ///
    /// Priority:
    /// 1. `env_key` (WALLET_ENCRYPTION_KEY); an invalid value is an error
    /// 2. The key file, if it exists
    /// 3. A freshly generated key, persisted to the key file before use
    pub fn load(env_key: Option<SecretString>, key_file: &Path) -> Result<Self> {
        if let Some(encoded) = env_key {
            let key = EncryptionKey::parse(&encoded)?;
            tracing::info!("Using wallet encryption key from environment");
            return Ok(Self::new(key));
        }

        if key_file.exists() {
            let content = SecretString::from(std::fs::read_to_string(key_file)?);
            let key = EncryptionKey::parse(&content)?;
            tracing::info!(path = %key_file.display(), "Using wallet encryption key from file");
            return Ok(Self::new(key));
        }

        let key = EncryptionKey::generate();
        write_key_file(key_file, &key)?;
        tracing::warn!(
            path = %key_file.display(),
            "Generated new wallet encryption key; back up this file, wallets cannot be recovered without it"
        );
        Ok(Self::new(key))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key.key)
            .map_err(|e| Error::Config(format!("Invalid encryption key: {}", e)))
    }

    /// Encrypt `plaintext`, returning base64 ciphertext
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()?
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Storage("Encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt base64 ciphertext; the result is wiped when dropped
    pub fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>> {
        let sealed = STANDARD.decode(ciphertext).map_err(|_| Error::Decryption)?;
        if sealed.len() <= NONCE_LEN {
            return Err(Error::Decryption);
        }

        let (nonce, body) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| Error::Decryption)?;
        Ok(Zeroizing::new(plaintext))
    }
}

fn write_key_file(path: &Path, key: &EncryptionKey) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(key.to_base64().expose_secret().as_bytes())?;
    file.sync_all()?;
    Ok(())
}
