// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AES-256-GCM sealing of agent private keys under a single master key.
//!
//! Every seal draws a fresh random 96-bit nonce, stored next to the ciphertext.
//! The master key itself never touches the database.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

use crate::domain::keys::EncryptedPrivateKey;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("Master key is not valid base64: {0}")]
    MasterKeyEncoding(String),

    #[error("Master key must be 32 bytes, got {0}")]
    MasterKeyLength(usize),

    #[error("Sealed key is not valid base64: {0}")]
    SealedEncoding(String),

    #[error("Sealed key nonce must be {NONCE_LEN} bytes")]
    NonceLength,

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed (wrong master key or corrupted ciphertext)")]
    Decrypt,
}

pub fn decode_master_key(master_key: &str) -> Result<[u8; 32], KeyVaultError> {
    let bytes = STANDARD
        .decode(master_key.trim())
        .map_err(|e| KeyVaultError::MasterKeyEncoding(e.to_string()))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| KeyVaultError::MasterKeyLength(len))
}

/// Base64 encoded random 32-byte master key.
pub fn generate_master_key() -> String {
    STANDARD.encode(Aes256Gcm::generate_key(&mut OsRng))
}

#[derive(Clone)]
pub struct KeyVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault").field("cipher", &"aes-256-gcm").finish()
    }
}

impl KeyVault {
    pub fn new(master_key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(master_key.into()),
        }
    }

    pub fn from_base64(master_key: &str) -> Result<Self, KeyVaultError> {
        Ok(Self::new(&decode_master_key(master_key)?))
    }

    /// Vault with a random master key. Sealed data does not survive a restart.
    pub fn ephemeral() -> Self {
        Self {
            cipher: Aes256Gcm::new(&Aes256Gcm::generate_key(&mut OsRng)),
        }
    }

    pub fn seal(&self, secret: &[u8]) -> Result<EncryptedPrivateKey, KeyVaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, secret)
            .map_err(|_| KeyVaultError::Encrypt)?;
        Ok(EncryptedPrivateKey {
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    pub fn open(&self, sealed: &EncryptedPrivateKey) -> Result<Vec<u8>, KeyVaultError> {
        let nonce = STANDARD
            .decode(&sealed.nonce)
            .map_err(|e| KeyVaultError::SealedEncoding(e.to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(KeyVaultError::NonceLength);
        }
        let ciphertext = STANDARD
            .decode(&sealed.ciphertext)
            .map_err(|e| KeyVaultError::SealedEncoding(e.to_string()))?;
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| KeyVaultError::Decrypt)
    }
}
