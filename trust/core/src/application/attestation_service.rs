// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Attestation Verifier
//!
//! Checks signed MCP server observations submitted by agents and turns the
//! verified ones into confidence contributions.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. payload parses and names the same server as the request
//! 2. agent exists, is verified and is not compromised
//! 3. the agent holds an unexpired key
//! 4. payload timestamp is inside the freshness window (either direction)
//! 5. the signature was not already accepted for a payload that is still fresh
//! 6. signature matches the current key, or the previous key while in grace
//!
//! Every outcome is appended to the attestation log once it is final. A
//! rejection is a normal outcome (`verified = false`), not an error; only
//! storage failures surface as `Err`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::policy_evaluator::SecurityPolicyEvaluator;
use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::attestation::{
    canonical_json, AgentMcpConnection, Attestation, AttestationId, AttestationOutcome,
    AttestationPayload, McpServerConfidence, McpServerId,
};
use crate::domain::capability::Severity;
use crate::domain::clock::Clock;
use crate::domain::config::{chrono_duration, time_after};
use crate::domain::errors::EngineError;
use crate::domain::events::AttestationEvent;
use crate::domain::keys::{KeySlot, KeyState};
use crate::domain::policy::{SecurityEvent, SecurityEventKind};
use crate::domain::repository::{AgentRepository, AttestationRepository};
use crate::infrastructure::audit::TrustAuditLogger;
use crate::infrastructure::crypto::signature;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::replay_cache::ReplayCache;

/// Request body for `VerifyAttestation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationSubmission {
    pub mcp_server_id: McpServerId,
    pub agent_id: AgentId,
    /// Kept as raw JSON so the canonical bytes are rebuilt from exactly what the
    /// agent sent.
    pub payload: Value,
    pub signature: String,
}

struct Authenticated {
    agent: Agent,
    payload: AttestationPayload,
    key_slot: KeySlot,
}

pub struct AttestationVerifier {
    agent_repo: Arc<dyn AgentRepository>,
    attestation_repo: Arc<dyn AttestationRepository>,
    policy_evaluator: Arc<SecurityPolicyEvaluator>,
    event_bus: Arc<EventBus>,
    audit: TrustAuditLogger,
    clock: Arc<dyn Clock>,
    replay_cache: ReplayCache,
    validity: Duration,
    freshness: Duration,
}

impl AttestationVerifier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        attestation_repo: Arc<dyn AttestationRepository>,
        policy_evaluator: Arc<SecurityPolicyEvaluator>,
        event_bus: Arc<EventBus>,
        audit: TrustAuditLogger,
        clock: Arc<dyn Clock>,
        validity: Duration,
        freshness: Duration,
    ) -> Self {
        Self {
            agent_repo,
            attestation_repo,
            policy_evaluator,
            event_bus,
            audit,
            clock,
            replay_cache: ReplayCache::new(),
            validity,
            freshness,
        }
    }

    pub async fn verify_attestation(
        &self,
        submission: &AttestationSubmission,
    ) -> Result<AttestationOutcome, EngineError> {
        let now = self.clock.now();
        match self.authenticate(submission, now).await {
            Ok(authenticated) => self.accept(submission, authenticated, now).await,
            Err(EngineError::Repository(e)) => Err(EngineError::Repository(e)),
            Err(rejection) => self.reject(submission, rejection, now).await,
        }
    }

    async fn authenticate(
        &self,
        submission: &AttestationSubmission,
        now: DateTime<Utc>,
    ) -> Result<Authenticated, EngineError> {
        let payload: AttestationPayload = serde_json::from_value(submission.payload.clone())
            .map_err(|e| EngineError::MalformedAttestation(e.to_string()))?;
        if payload.mcp_server_id != submission.mcp_server_id {
            return Err(EngineError::MalformedAttestation(format!(
                "payload names server {} but was submitted for {}",
                payload.mcp_server_id, submission.mcp_server_id
            )));
        }

        let agent = self
            .agent_repo
            .find_by_id(submission.agent_id)
            .await?
            .ok_or(EngineError::UnknownAgent(submission.agent_id))?;
        if agent.is_compromised {
            return Err(EngineError::AgentCompromised(agent.id));
        }
        if agent.status != AgentStatus::Verified {
            return Err(EngineError::AgentInactive {
                agent_id: agent.id,
                status: agent.status,
            });
        }

        // One clone of the key material for every check below.
        let material = agent
            .key_material
            .clone()
            .ok_or(EngineError::KeyNotIssued(agent.id))?;
        if material.state(now) == KeyState::Expired {
            return Err(EngineError::InvalidSignature(format!(
                "signing key expired at {}",
                material.expires_at
            )));
        }

        let skew = (now - payload.timestamp).abs();
        if skew > chrono_duration(self.freshness) {
            return Err(EngineError::ReplayedAttestation(format!(
                "payload timestamp {} is outside the {:?} freshness window",
                payload.timestamp, self.freshness
            )));
        }
        if self.replay_cache.contains(&submission.signature, now) {
            return Err(EngineError::ReplayedAttestation("signature already submitted".to_string()));
        }

        let message = canonical_json(&submission.payload)
            .map_err(|e| EngineError::MalformedAttestation(e.to_string()))?;
        let key_slot = material
            .candidates(now)
            .into_iter()
            .find(|(_, key)| signature::verify(key, &message, &submission.signature).is_ok())
            .map(|(slot, _)| slot)
            .ok_or_else(|| EngineError::InvalidSignature("signature does not match any accepted key".to_string()))?;

        // Blocked until the payload itself goes stale, even when it is dated ahead.
        let stale_at = time_after(payload.timestamp.max(now), self.freshness);
        if !self.replay_cache.claim(&submission.signature, stale_at, now) {
            return Err(EngineError::ReplayedAttestation("signature already submitted".to_string()));
        }

        Ok(Authenticated {
            agent,
            payload,
            key_slot,
        })
    }

    async fn accept(
        &self,
        submission: &AttestationSubmission,
        authenticated: Authenticated,
        now: DateTime<Utc>,
    ) -> Result<AttestationOutcome, EngineError> {
        let Authenticated {
            agent,
            payload,
            key_slot,
        } = authenticated;
        let contribution = agent.trust_score * payload.quality();

        let record = Attestation {
            id: AttestationId::new(),
            mcp_server_id: submission.mcp_server_id,
            agent_id: Some(agent.id),
            payload: submission.payload.clone(),
            signature: Some(submission.signature.clone()),
            verified: true,
            failure_reason: None,
            verified_at: Some(now),
            expires_at: Some(time_after(now, self.validity)),
            is_valid: true,
            confidence_contribution: contribution,
            key_slot: Some(key_slot),
            recorded_at: now,
        };
        self.attestation_repo.append(&record).await?;

        let connection = match self
            .attestation_repo
            .find_connection(agent.id, submission.mcp_server_id)
            .await?
        {
            Some(mut existing) => {
                existing.record(payload.latency_ms, now);
                existing
            }
            None => AgentMcpConnection::first(agent.id, submission.mcp_server_id, payload.latency_ms, now),
        };
        self.attestation_repo.save_connection(&connection).await?;

        debug!(
            attestation_id = %record.id,
            agent_id = %agent.id,
            mcp_server_id = %submission.mcp_server_id,
            key_slot = key_slot.as_str(),
            contribution,
            "Attestation verified"
        );
        metrics::counter!("aegis_trust_attestations_total", "outcome" => "verified").increment(1);
        self.event_bus.publish_attestation_event(AttestationEvent::AttestationVerified {
            attestation_id: record.id,
            mcp_server_id: submission.mcp_server_id,
            agent_id: agent.id,
            confidence_contribution: contribution,
            verified_at: now,
        });

        Ok(AttestationOutcome::from(&record))
    }

    async fn reject(
        &self,
        submission: &AttestationSubmission,
        rejection: EngineError,
        now: DateTime<Utc>,
    ) -> Result<AttestationOutcome, EngineError> {
        let reason = rejection.to_string();
        // Unknown agents cannot be referenced by the stored record.
        let known_agent = match rejection {
            EngineError::UnknownAgent(_) => None,
            _ => Some(submission.agent_id),
        };

        let record = Attestation::rejected(
            submission.mcp_server_id,
            known_agent,
            submission.payload.clone(),
            Some(submission.signature.clone()),
            reason.clone(),
            now,
        );
        self.attestation_repo.append(&record).await?;

        self.audit
            .log_attestation_rejected(submission.mcp_server_id, Some(submission.agent_id), &reason);
        metrics::counter!("aegis_trust_attestations_total", "outcome" => "rejected").increment(1);
        self.event_bus.publish_attestation_event(AttestationEvent::AttestationRejected {
            attestation_id: record.id,
            mcp_server_id: submission.mcp_server_id,
            agent_id: known_agent,
            reason: reason.clone(),
            rejected_at: now,
        });

        if known_agent.is_some() {
            self.report_failure(submission, &reason, now).await;
        }

        Ok(AttestationOutcome::from(&record))
    }

    async fn report_failure(&self, submission: &AttestationSubmission, reason: &str, now: DateTime<Utc>) {
        let agent = match self.agent_repo.find_by_id(submission.agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => return,
            Err(e) => {
                warn!(agent_id = %submission.agent_id, error = %e, "Skipping attestation failure policy check");
                return;
            }
        };
        let event = SecurityEvent {
            organization_id: agent.organization_id,
            agent_id: agent.id,
            agent_type: agent.agent_type,
            severity: Severity::High,
            kind: SecurityEventKind::AttestationFailure {
                mcp_server_id: submission.mcp_server_id,
                reason: reason.to_string(),
            },
            occurred_at: now,
        };
        self.policy_evaluator.evaluate_advisory(&event).await;
    }

    /// Record an operator observation with no signing agent. Never counts as verified.
    pub async fn record_manual(&self, mcp_server_id: McpServerId, payload: Value) -> Result<Attestation, EngineError> {
        let record = Attestation::manual(mcp_server_id, payload, self.clock.now());
        self.attestation_repo.append(&record).await?;
        info!(attestation_id = %record.id, mcp_server_id = %mcp_server_id, "Manual attestation recorded");
        Ok(record)
    }

    pub async fn find(&self, id: AttestationId) -> Result<Option<Attestation>, EngineError> {
        Ok(self.attestation_repo.find_by_id(id).await?)
    }

    /// Mean contribution over the newest valid attestation of each distinct agent.
    pub async fn server_confidence(&self, mcp_server_id: McpServerId) -> Result<McpServerConfidence, EngineError> {
        let latest = self
            .attestation_repo
            .latest_valid_per_agent(mcp_server_id, self.clock.now())
            .await?;
        let confidence = if latest.is_empty() {
            0.0
        } else {
            latest.iter().map(|a| a.confidence_contribution).sum::<f64>() / latest.len() as f64
        };
        Ok(McpServerConfidence {
            mcp_server_id,
            confidence,
            attesting_agents: latest.len(),
        })
    }

    /// Flip `is_valid` on expired records and forget replay entries whose
    /// payload can no longer pass the freshness check.
    pub async fn expire_stale(&self) -> Result<u64, EngineError> {
        let now = self.clock.now();
        self.replay_cache.prune(now);

        let count = self.attestation_repo.expire_stale(now).await?;
        if count > 0 {
            info!(count, "Expired attestations swept");
            self.event_bus.publish_attestation_event(AttestationEvent::AttestationsExpired {
                count,
                swept_at: now,
            });
        }
        Ok(count)
    }
}

/// Run [`AttestationVerifier::expire_stale`] every `interval`.
pub fn spawn_expiry_sweeper(verifier: Arc<AttestationVerifier>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = verifier.expire_stale().await {
                warn!(error = %e, "Attestation expiry sweep failed");
            }
        }
    })
}
