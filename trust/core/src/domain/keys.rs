// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Key Material
//!
//! Each agent owns at most one Ed25519 signing identity, embedded in the agent
//! aggregate as a single [`KeyMaterial`] value. Rotation swaps the whole value, so
//! readers either see the old set or the new one, never a mix.
//!
//! ```text
//! no_key ──generate──► active ──rotate──► rotating (previous key in grace)
//!                        ▲                      │
//!                        └──── grace elapses ───┘
//! ```
//!
//! The private key is stored only as AES-256-GCM ciphertext and is handed back to
//! the caller exactly once, inside [`IssuedKeyPair`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Ed25519,
}

impl KeyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
        }
    }
}

/// AES-256-GCM sealed private key. Both fields are base64 (standard alphabet).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPrivateKey {
    pub nonce: String,
    pub ciphertext: String,
}

impl std::fmt::Debug for EncryptedPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedPrivateKey")
            .field("nonce", &self.nonce)
            .field("ciphertext", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub algorithm: KeyAlgorithm,
    /// Base64 encoded 32-byte Ed25519 verifying key.
    pub current_public_key: String,
    /// Key replaced by the last rotation. Accepted only while `now < grace_period_end`.
    pub previous_public_key: Option<String>,
    pub encrypted_private_key: EncryptedPrivateKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub rotation_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    NoKey,
    Active,
    Rotating,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySlot {
    Current,
    Previous,
}

impl KeySlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Previous => "previous",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "current" => Some(Self::Current),
            "previous" => Some(Self::Previous),
            _ => None,
        }
    }
}

impl KeyMaterial {
    pub fn previous_in_grace(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.previous_public_key, self.grace_period_end) {
            (Some(key), Some(end)) if now < end => Some(key.as_str()),
            _ => None,
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> KeyState {
        if now >= self.expires_at {
            KeyState::Expired
        } else if self.previous_in_grace(now).is_some() {
            KeyState::Rotating
        } else {
            KeyState::Active
        }
    }

    pub fn verification_keys(&self, agent_id: AgentId, now: DateTime<Utc>) -> VerificationKeySet {
        let previous = self.previous_in_grace(now).map(str::to_string);
        VerificationKeySet {
            agent_id,
            algorithm: self.algorithm,
            current: self.current_public_key.clone(),
            grace_period_end: previous.as_ref().and(self.grace_period_end),
            previous,
            expires_at: self.expires_at,
            rotation_count: self.rotation_count,
            state: self.state(now),
        }
    }

    /// Candidate keys in the order they must be tried.
    pub fn candidates(&self, now: DateTime<Utc>) -> Vec<(KeySlot, &str)> {
        let mut keys = vec![(KeySlot::Current, self.current_public_key.as_str())];
        if let Some(previous) = self.previous_in_grace(now) {
            keys.push((KeySlot::Previous, previous));
        }
        keys
    }
}

/// The public half of an agent's identity as seen by verifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationKeySet {
    pub agent_id: AgentId,
    pub algorithm: KeyAlgorithm,
    pub current: String,
    pub previous: Option<String>,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub rotation_count: u32,
    pub state: KeyState,
}

/// Result of key generation or rotation. The only place a private key ever leaves
/// the engine.
#[derive(Clone, Serialize)]
pub struct IssuedKeyPair {
    pub agent_id: AgentId,
    pub public_key: String,
    /// Base64 encoded 32-byte Ed25519 secret key.
    pub private_key: String,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub rotation_count: u32,
}

impl std::fmt::Debug for IssuedKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedKeyPair")
            .field("agent_id", &self.agent_id)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("grace_period_end", &self.grace_period_end)
            .field("expires_at", &self.expires_at)
            .field("rotation_count", &self.rotation_count)
            .finish()
    }
}

/// Signature by a currently accepted key over [`rotation_proof_message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationProof {
    /// Unix seconds embedded in the signed message.
    pub timestamp: i64,
    /// Base64 Ed25519 signature.
    pub signature: String,
}

pub fn rotation_proof_message(agent_id: AgentId, unix_ts: i64) -> String {
    format!("aegis-trust:rotate:{agent_id}:{unix_ts}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn material(now: DateTime<Utc>) -> KeyMaterial {
        KeyMaterial {
            algorithm: KeyAlgorithm::Ed25519,
            current_public_key: "current".to_string(),
            previous_public_key: Some("previous".to_string()),
            encrypted_private_key: EncryptedPrivateKey {
                nonce: "bm9uY2U=".to_string(),
                ciphertext: "c2VjcmV0".to_string(),
            },
            created_at: now,
            expires_at: now + Duration::days(90),
            grace_period_end: Some(now + Duration::hours(24)),
            rotation_count: 1,
        }
    }

    #[test]
    fn test_previous_key_only_inside_grace() {
        let now = Utc::now();
        let keys = material(now);
        assert_eq!(keys.previous_in_grace(now), Some("previous"));
        assert_eq!(keys.state(now), KeyState::Rotating);

        let later = now + Duration::hours(24);
        assert_eq!(keys.previous_in_grace(later), None);
        assert_eq!(keys.state(later), KeyState::Active);
        assert_eq!(keys.candidates(later).len(), 1);
    }

    #[test]
    fn test_verification_key_set_hides_expired_grace() {
        let now = Utc::now();
        let keys = material(now);
        let agent_id = AgentId::new();
        let set = keys.verification_keys(agent_id, now + Duration::hours(25));
        assert_eq!(set.current, "current");
        assert!(set.previous.is_none());
        assert!(set.grace_period_end.is_none());
    }

    #[test]
    fn test_expired_state() {
        let now = Utc::now();
        let keys = material(now);
        assert_eq!(keys.state(now + Duration::days(91)), KeyState::Expired);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let now = Utc::now();
        let keys = material(now);
        assert!(!format!("{keys:?}").contains("c2VjcmV0"));

        let issued = IssuedKeyPair {
            agent_id: AgentId::new(),
            public_key: "pub".to_string(),
            private_key: "super-secret".to_string(),
            grace_period_end: None,
            expires_at: now,
            rotation_count: 0,
        };
        assert!(!format!("{issued:?}").contains("super-secret"));
    }

    #[test]
    fn test_rotation_proof_message_format() {
        let agent_id = AgentId::from_string("2b1d7b7e-8f44-4a4e-9d7c-0f8c4a1c2e11").unwrap();
        assert_eq!(
            rotation_proof_message(agent_id, 1_700_000_000),
            "aegis-trust:rotate:2b1d7b7e-8f44-4a4e-9d7c-0f8c4a1c2e11:1700000000"
        );
    }
}
