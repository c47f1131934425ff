// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cryptographic primitives: Ed25519 signatures and AES-256-GCM key sealing.

pub mod key_vault;
pub mod signature;

pub use key_vault::{KeyVault, KeyVaultError};
pub use signature::SignatureError;
