// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ed25519 signing and verification over base64 encoded keys and signatures.
//!
//! Public keys are 32 raw bytes, signatures 64 raw bytes, both carried as
//! standard-alphabet base64 strings on the wire and in storage.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Invalid base64 {what}: {reason}")]
    Encoding { what: &'static str, reason: String },

    #[error("Invalid {what} length (must be {expected} bytes)")]
    Length { what: &'static str, expected: usize },

    #[error("Invalid public key: {0}")]
    PublicKey(String),

    #[error("Signature verification failed")]
    Mismatch,
}

/// Freshly generated Ed25519 key pair, base64 encoded.
pub struct Ed25519KeyPair {
    pub public_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for Ed25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519KeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

pub fn generate_keypair() -> Ed25519KeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    Ed25519KeyPair {
        public_key: STANDARD.encode(signing_key.verifying_key().to_bytes()),
        secret_key: STANDARD.encode(signing_key.to_bytes()),
    }
}

fn decode_fixed<const N: usize>(value: &str, what: &'static str) -> Result<[u8; N], SignatureError> {
    let bytes = STANDARD.decode(value.trim()).map_err(|e| SignatureError::Encoding {
        what,
        reason: e.to_string(),
    })?;
    bytes
        .try_into()
        .map_err(|_| SignatureError::Length { what, expected: N })
}

pub fn decode_public_key(public_key: &str) -> Result<VerifyingKey, SignatureError> {
    let bytes = decode_fixed::<32>(public_key, "public key")?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SignatureError::PublicKey(e.to_string()))
}

/// Verify a base64 Ed25519 `signature` over `message` with a base64 `public_key`.
pub fn verify(public_key: &str, message: &[u8], signature: &str) -> Result<(), SignatureError> {
    let verifying_key = decode_public_key(public_key)?;
    let sig_bytes = decode_fixed::<64>(signature, "signature")?;
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// Sign `message` with a base64 secret key. Agents do this on their side; the
/// engine uses it for rotation proofs in tooling and tests.
pub fn sign(secret_key: &str, message: &[u8]) -> Result<String, SignatureError> {
    let bytes = decode_fixed::<32>(secret_key, "secret key")?;
    let signing_key = SigningKey::from_bytes(&bytes);
    Ok(STANDARD.encode(signing_key.sign(message).to_bytes()))
}

/// Hex SHA-256 of a base64 key or signature, for logs and lookup keys.
pub fn fingerprint(encoded: &str) -> String {
    hex::encode(Sha256::digest(encoded.trim().as_bytes()))
}

/// Check that a base64 signature has the right shape without verifying it.
pub fn decode_signature(signature: &str) -> Result<[u8; 64], SignatureError> {
    decode_fixed::<64>(signature, "signature")
}
