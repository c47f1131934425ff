// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Key Lifecycle Manager
//!
//! Issues and rotates per-agent Ed25519 signing keys.
//!
//! ```text
//! no_key ──generate──► active ──rotate──► rotating(grace) ──grace ends──► active(new)
//!                         ▲                     │
//!                         └──────rotate─────────┘
//! ```
//!
//! The whole [`KeyMaterial`] value is swapped in one versioned
//! compare-and-swap on the agent record, so a verifier that clones the agent
//! sees either the old key set or the new one. A lost race surfaces as
//! [`EngineError::KeyRotationConflict`] and is never retried here.
//!
//! Private keys are sealed with the [`KeyVault`] before they touch the agent
//! record. The plaintext leaves the engine exactly once, inside the
//! [`IssuedKeyPair`] returned to the caller.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::application::trust_score::TrustRecalculationQueue;
use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::clock::Clock;
use crate::domain::config::{chrono_duration, time_after, KeyConfig};
use crate::domain::errors::EngineError;
use crate::domain::events::{AgentLifecycleEvent, KeyEvent};
use crate::domain::keys::{
    rotation_proof_message, EncryptedPrivateKey, IssuedKeyPair, KeyAlgorithm, KeyMaterial, KeyState, RotationProof,
    VerificationKeySet,
};
use crate::domain::repository::{AgentRepository, RepositoryError};
use crate::infrastructure::audit::TrustAuditLogger;
use crate::infrastructure::crypto::key_vault::KeyVault;
use crate::infrastructure::crypto::signature;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::replay_cache::ReplayCache;

pub struct KeyLifecycleManager {
    agent_repo: Arc<dyn AgentRepository>,
    vault: KeyVault,
    event_bus: Arc<EventBus>,
    audit: TrustAuditLogger,
    clock: Arc<dyn Clock>,
    recalculation: TrustRecalculationQueue,
    config: KeyConfig,
    proof_freshness: chrono::Duration,
    used_proofs: ReplayCache,
}

impl KeyLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        vault: KeyVault,
        event_bus: Arc<EventBus>,
        audit: TrustAuditLogger,
        clock: Arc<dyn Clock>,
        recalculation: TrustRecalculationQueue,
        config: KeyConfig,
        proof_freshness: std::time::Duration,
    ) -> Self {
        Self {
            agent_repo,
            vault,
            event_bus,
            audit,
            clock,
            recalculation,
            config,
            proof_freshness: chrono_duration(proof_freshness),
            used_proofs: ReplayCache::new(),
        }
    }

    async fn load_agent(&self, agent_id: AgentId) -> Result<Agent, EngineError> {
        self.agent_repo
            .find_by_id(agent_id)
            .await?
            .ok_or(EngineError::UnknownAgent(agent_id))
    }

    fn ensure_may_hold_key(agent: &Agent) -> Result<(), EngineError> {
        if agent.is_compromised {
            return Err(EngineError::AgentCompromised(agent.id));
        }
        if agent.status == AgentStatus::Revoked {
            return Err(EngineError::AgentInactive {
                agent_id: agent.id,
                status: agent.status,
            });
        }
        Ok(())
    }

    /// Generate a fresh pair and seal its secret half.
    fn issue(&self) -> Result<(String, String, EncryptedPrivateKey), EngineError> {
        let pair = signature::generate_keypair();
        let secret = STANDARD
            .decode(&pair.secret_key)
            .map_err(|e| EngineError::Crypto(e.to_string()))?;
        let sealed = self
            .vault
            .seal(&secret)
            .map_err(|e| EngineError::Crypto(e.to_string()))?;
        Ok((pair.public_key, pair.secret_key, sealed))
    }

    /// Write `agent` back, mapping a lost version race to `KeyRotationConflict`.
    async fn swap(&self, agent: &Agent, expected_version: u64) -> Result<Agent, EngineError> {
        match self.agent_repo.compare_and_swap(agent, expected_version).await {
            Ok(updated) => Ok(updated),
            Err(RepositoryError::VersionConflict { .. }) => Err(EngineError::KeyRotationConflict(agent.id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn generate_key_pair(&self, agent_id: AgentId) -> Result<IssuedKeyPair, EngineError> {
        let mut agent = self.load_agent(agent_id).await?;
        Self::ensure_may_hold_key(&agent)?;
        if agent.key_material.is_some() {
            return Err(EngineError::KeyAlreadyIssued(agent_id));
        }

        let now = self.clock.now();
        let (public_key, private_key, sealed) = self.issue()?;
        let material = KeyMaterial {
            algorithm: KeyAlgorithm::Ed25519,
            current_public_key: public_key.clone(),
            previous_public_key: None,
            encrypted_private_key: sealed,
            created_at: now,
            expires_at: time_after(now, self.config.key_lifetime),
            grace_period_end: None,
            rotation_count: 0,
        };
        let expires_at = material.expires_at;

        let expected_version = agent.version;
        agent.key_material = Some(material);
        agent.updated_at = now;
        self.swap(&agent, expected_version).await?;

        self.audit.log_key_issued(agent_id, &public_key, 0);
        metrics::counter!("aegis_trust_key_rotations_total", "kind" => "issue").increment(1);
        self.event_bus.publish_key_event(KeyEvent::KeyIssued {
            agent_id,
            public_key: public_key.clone(),
            issued_at: now,
        });

        Ok(IssuedKeyPair {
            agent_id,
            public_key,
            private_key,
            grace_period_end: None,
            expires_at,
            rotation_count: 0,
        })
    }

    /// Operator-initiated rotation.
    pub async fn rotate_key_pair(&self, agent_id: AgentId) -> Result<IssuedKeyPair, EngineError> {
        let agent = self.load_agent(agent_id).await?;
        self.rotate(agent).await
    }

    /// Rotation requested by the agent itself, authenticated by a signature from
    /// a currently accepted key. The proof is checked against the same agent
    /// version that the rotation writes over, and each proof is accepted once.
    pub async fn rotate_with_proof(&self, agent_id: AgentId, proof: &RotationProof) -> Result<IssuedKeyPair, EngineError> {
        let agent = self.load_agent(agent_id).await?;
        let material = agent
            .key_material
            .as_ref()
            .ok_or(EngineError::KeyNotIssued(agent_id))?;
        let now = self.clock.now();
        if self.used_proofs.contains(&proof.signature, now) {
            return Err(EngineError::ReplayedAttestation("rotation proof already used".to_string()));
        }
        let signed_at = verify_rotation_proof(material, agent_id, proof, now, self.proof_freshness)?;

        let stale_at = signed_at
            .max(now)
            .checked_add_signed(self.proof_freshness)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if !self.used_proofs.claim(&proof.signature, stale_at, now) {
            return Err(EngineError::ReplayedAttestation("rotation proof already used".to_string()));
        }
        self.used_proofs.prune(now);
        self.rotate(agent).await
    }

    async fn rotate(&self, mut agent: Agent) -> Result<IssuedKeyPair, EngineError> {
        let agent_id = agent.id;
        Self::ensure_may_hold_key(&agent)?;
        let existing = agent
            .key_material
            .as_ref()
            .ok_or(EngineError::KeyNotIssued(agent_id))?;

        let now = self.clock.now();
        let (public_key, private_key, sealed) = self.issue()?;
        let grace_period_end = time_after(now, self.config.grace_period);
        let rotation_count = existing.rotation_count.saturating_add(1);
        let material = KeyMaterial {
            algorithm: KeyAlgorithm::Ed25519,
            current_public_key: public_key.clone(),
            previous_public_key: Some(existing.current_public_key.clone()),
            encrypted_private_key: sealed,
            created_at: now,
            expires_at: time_after(now, self.config.key_lifetime),
            grace_period_end: Some(grace_period_end),
            rotation_count,
        };
        let expires_at = material.expires_at;

        let expected_version = agent.version;
        agent.key_material = Some(material);
        agent.updated_at = now;
        self.swap(&agent, expected_version).await?;

        info!(agent_id = %agent_id, rotation_count, grace_period_end = %grace_period_end, "Signing key rotated");
        self.audit.log_key_issued(agent_id, &public_key, rotation_count);
        metrics::counter!("aegis_trust_key_rotations_total", "kind" => "rotate").increment(1);
        self.event_bus.publish_key_event(KeyEvent::KeyRotated {
            agent_id,
            public_key: public_key.clone(),
            rotation_count,
            grace_period_end,
        });

        Ok(IssuedKeyPair {
            agent_id,
            public_key,
            private_key,
            grace_period_end: Some(grace_period_end),
            expires_at,
            rotation_count,
        })
    }

    pub async fn get_verification_keys(&self, agent_id: AgentId) -> Result<VerificationKeySet, EngineError> {
        let agent = self.load_agent(agent_id).await?;
        let material = agent
            .key_material
            .as_ref()
            .ok_or(EngineError::KeyNotIssued(agent_id))?;
        Ok(material.verification_keys(agent_id, self.clock.now()))
    }

    /// Flag the agent compromised and drop its previous key without grace.
    pub async fn mark_compromised(&self, agent_id: AgentId) -> Result<Agent, EngineError> {
        let mut agent = self.load_agent(agent_id).await?;
        if agent.is_compromised {
            return Ok(agent);
        }

        let now = self.clock.now();
        let had_previous = agent
            .key_material
            .as_ref()
            .is_some_and(|m| m.previous_public_key.is_some());
        if let Some(material) = agent.key_material.as_mut() {
            material.previous_public_key = None;
            material.grace_period_end = None;
        }
        agent.is_compromised = true;
        agent.updated_at = now;

        let expected_version = agent.version;
        let updated = match self.agent_repo.compare_and_swap(&agent, expected_version).await {
            Ok(updated) => updated,
            Err(RepositoryError::VersionConflict { .. }) => return Err(EngineError::ConcurrentModification(agent_id)),
            Err(e) => return Err(e.into()),
        };

        self.audit.log_compromise(agent_id);
        self.event_bus.publish_agent_event(AgentLifecycleEvent::AgentCompromised {
            agent_id,
            marked_at: now,
        });
        if had_previous {
            self.event_bus.publish_key_event(KeyEvent::PreviousKeyRevoked {
                agent_id,
                revoked_at: now,
            });
        }
        self.recalculation.enqueue(agent_id);

        Ok(updated)
    }
}

/// Check that `proof` is a fresh signature over the rotation message by a key
/// the agent currently holds. Returns the instant the proof was signed.
pub fn verify_rotation_proof(
    material: &KeyMaterial,
    agent_id: AgentId,
    proof: &RotationProof,
    now: DateTime<Utc>,
    freshness: chrono::Duration,
) -> Result<DateTime<Utc>, EngineError> {
    let signed_at = DateTime::<Utc>::from_timestamp(proof.timestamp, 0)
        .ok_or_else(|| EngineError::InvalidInput(format!("invalid proof timestamp {}", proof.timestamp)))?;
    if (now - signed_at).abs() > freshness {
        return Err(EngineError::ReplayedAttestation(
            "rotation proof timestamp outside freshness window".to_string(),
        ));
    }
    if material.state(now) == KeyState::Expired {
        return Err(EngineError::InvalidSignature(format!(
            "signing key expired at {}",
            material.expires_at
        )));
    }

    let message = rotation_proof_message(agent_id, proof.timestamp);
    let accepted = material
        .candidates(now)
        .into_iter()
        .any(|(_, key)| signature::verify(key, message.as_bytes(), &proof.signature).is_ok());
    if accepted {
        Ok(signed_at)
    } else {
        Err(EngineError::InvalidSignature("rotation proof does not match any accepted key".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::OrganizationId;
    use crate::domain::clock::ManualClock;
    use crate::domain::trust::{SnapshotSource, TrustFactors, TrustScoreSnapshot, TrustWeights};
    use crate::infrastructure::repositories::InMemoryAgentRepository;
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        manager: KeyLifecycleManager,
        agents: InMemoryAgentRepository,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let agents = InMemoryAgentRepository::new();
        let clock = ManualClock::new(Utc::now());
        let (queue, _receiver) = TrustRecalculationQueue::new(8);
        let manager = KeyLifecycleManager::new(
            Arc::new(agents.clone()),
            KeyVault::ephemeral(),
            Arc::new(EventBus::new(16)),
            TrustAuditLogger::new(),
            Arc::new(clock.clone()),
            queue,
            KeyConfig::default(),
            Duration::from_secs(300),
        );
        Fixture { manager, agents, clock }
    }

    async fn agent(fixture: &Fixture) -> AgentId {
        let agent = Agent::new(OrganizationId::new(), "signer", "research", fixture.clock.now());
        let snapshot = TrustScoreSnapshot {
            id: Uuid::new_v4(),
            agent_id: agent.id,
            factors: TrustFactors {
                verification: 0.3,
                uptime: 0.75,
                success_rate: 0.8,
                security: 1.0,
                compliance: 1.0,
                age: 0.3,
                drift: 1.0,
                feedback: 0.75,
            },
            weights: TrustWeights::default(),
            score: 0.675,
            confidence: 0.375,
            source: SnapshotSource::FullRecalculation,
            computed_at: fixture.clock.now(),
        };
        fixture.agents.insert(&agent, &snapshot).await.unwrap().id
    }

    #[tokio::test]
    async fn test_generate_then_reject_second_generation() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;

        let issued = fixture.manager.generate_key_pair(agent_id).await.unwrap();
        assert_eq!(issued.rotation_count, 0);

        let stored = fixture.agents.find_by_id(agent_id).await.unwrap().unwrap();
        let material = stored.key_material.unwrap();
        assert_eq!(material.current_public_key, issued.public_key);
        assert_ne!(material.encrypted_private_key.ciphertext, issued.private_key);

        assert!(matches!(
            fixture.manager.generate_key_pair(agent_id).await,
            Err(EngineError::KeyAlreadyIssued(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_requires_existing_key() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        assert!(matches!(
            fixture.manager.rotate_key_pair(agent_id).await,
            Err(EngineError::KeyNotIssued(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_keeps_previous_during_grace() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        let first = fixture.manager.generate_key_pair(agent_id).await.unwrap();
        let second = fixture.manager.rotate_key_pair(agent_id).await.unwrap();
        assert_eq!(second.rotation_count, 1);

        let keys = fixture.manager.get_verification_keys(agent_id).await.unwrap();
        assert_eq!(keys.current, second.public_key);
        assert_eq!(keys.previous.as_deref(), Some(first.public_key.as_str()));
        assert_eq!(keys.state, KeyState::Rotating);

        fixture.clock.advance(chrono::Duration::hours(25));
        let keys = fixture.manager.get_verification_keys(agent_id).await.unwrap();
        assert!(keys.previous.is_none());
        assert_eq!(keys.state, KeyState::Active);
    }

    #[tokio::test]
    async fn test_rotation_with_proof() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        let issued = fixture.manager.generate_key_pair(agent_id).await.unwrap();

        let timestamp = fixture.clock.now().timestamp();
        let message = rotation_proof_message(agent_id, timestamp);
        let proof = RotationProof {
            timestamp,
            signature: signature::sign(&issued.private_key, message.as_bytes()).unwrap(),
        };
        let rotated = fixture.manager.rotate_with_proof(agent_id, &proof).await.unwrap();
        assert_ne!(rotated.public_key, issued.public_key);

        let forged = RotationProof {
            timestamp,
            signature: signature::sign(&signature::generate_keypair().secret_key, message.as_bytes()).unwrap(),
        };
        assert!(matches!(
            fixture.manager.rotate_with_proof(agent_id, &forged).await,
            Err(EngineError::InvalidSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_rotation_proof_is_single_use() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        let issued = fixture.manager.generate_key_pair(agent_id).await.unwrap();

        let timestamp = fixture.clock.now().timestamp();
        let proof = RotationProof {
            timestamp,
            signature: signature::sign(&issued.private_key, rotation_proof_message(agent_id, timestamp).as_bytes())
                .unwrap(),
        };
        let rotated = fixture.manager.rotate_with_proof(agent_id, &proof).await.unwrap();
        assert_eq!(rotated.rotation_count, 1);

        // The signing key is now the in-grace previous key, so only the
        // single-use check stops the same proof.
        fixture.clock.advance(chrono::Duration::seconds(30));
        assert!(matches!(
            fixture.manager.rotate_with_proof(agent_id, &proof).await,
            Err(EngineError::ReplayedAttestation(_))
        ));
        let stored = fixture.agents.find_by_id(agent_id).await.unwrap().unwrap();
        assert_eq!(stored.key_material.unwrap().rotation_count, 1);

        let timestamp = fixture.clock.now().timestamp();
        let fresh = RotationProof {
            timestamp,
            signature: signature::sign(&rotated.private_key, rotation_proof_message(agent_id, timestamp).as_bytes())
                .unwrap(),
        };
        assert_eq!(fixture.manager.rotate_with_proof(agent_id, &fresh).await.unwrap().rotation_count, 2);
    }

    #[tokio::test]
    async fn test_stale_proof_rejected() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        let issued = fixture.manager.generate_key_pair(agent_id).await.unwrap();

        let timestamp = fixture.clock.now().timestamp() - 3600;
        let proof = RotationProof {
            timestamp,
            signature: signature::sign(&issued.private_key, rotation_proof_message(agent_id, timestamp).as_bytes())
                .unwrap(),
        };
        assert!(matches!(
            fixture.manager.rotate_with_proof(agent_id, &proof).await,
            Err(EngineError::ReplayedAttestation(_))
        ));
    }

    #[tokio::test]
    async fn test_compromise_drops_previous_key_and_blocks_rotation() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        fixture.manager.generate_key_pair(agent_id).await.unwrap();
        fixture.manager.rotate_key_pair(agent_id).await.unwrap();

        let compromised = fixture.manager.mark_compromised(agent_id).await.unwrap();
        assert!(compromised.is_compromised);
        let keys = fixture.manager.get_verification_keys(agent_id).await.unwrap();
        assert!(keys.previous.is_none());

        assert!(matches!(
            fixture.manager.rotate_key_pair(agent_id).await,
            Err(EngineError::AgentCompromised(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_rotations_conflict() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        fixture.manager.generate_key_pair(agent_id).await.unwrap();

        let stale = fixture.agents.find_by_id(agent_id).await.unwrap().unwrap();
        fixture.manager.rotate_key_pair(agent_id).await.unwrap();
        assert!(matches!(
            fixture.manager.rotate(stale).await,
            Err(EngineError::KeyRotationConflict(_))
        ));
    }
}
