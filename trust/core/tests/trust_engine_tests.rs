// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use aegis_trust_core::application::capability_enforcement::{ActionRequest, CapabilityGrantRequest};
use aegis_trust_core::application::{AttestationSubmission, RegisterAgentRequest, Repositories, TrustEngine};
use aegis_trust_core::domain::agent::{Agent, AgentId, AgentStatus, OrganizationId};
use aegis_trust_core::domain::attestation::{canonical_json, McpServerId};
use aegis_trust_core::domain::clock::{Clock, ManualClock};
use aegis_trust_core::domain::config::TrustEngineSpec;
use aegis_trust_core::domain::errors::EngineError;
use aegis_trust_core::domain::keys::{rotation_proof_message, KeySlot, KeyState, RotationProof};
use aegis_trust_core::domain::trust::SnapshotSource;
use aegis_trust_core::infrastructure::crypto::key_vault::KeyVault;
use aegis_trust_core::infrastructure::crypto::signature;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Harness {
    engine: TrustEngine,
    clock: ManualClock,
    // Enqueued recalculations wait here until a test drains them.
    receiver: mpsc::Receiver<AgentId>,
}

impl Harness {
    /// Apply every queued recalculation the way the background worker does.
    async fn drain_recalculations(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(agent_id) = self.receiver.try_recv() {
            self.engine.trust.recalculate_or_last_known(agent_id).await.unwrap();
            applied += 1;
        }
        applied
    }
}

fn harness() -> Harness {
    let clock = ManualClock::new(Utc::now());
    let (engine, receiver) = TrustEngine::new(
        TrustEngineSpec::default(),
        Repositories::in_memory(),
        KeyVault::ephemeral(),
        Arc::new(clock.clone()),
    );
    Harness {
        engine,
        clock,
        receiver,
    }
}

async fn register(harness: &Harness) -> Agent {
    harness
        .engine
        .registry
        .register(&RegisterAgentRequest {
            organization_id: OrganizationId::new(),
            name: "indexer".to_string(),
            agent_type: "research".to_string(),
        })
        .await
        .unwrap()
}

fn action(agent_id: AgentId, action_type: &str) -> ActionRequest {
    ActionRequest {
        agent_id,
        action_type: action_type.to_string(),
        resource: "/srv/data".to_string(),
        context: Value::Null,
    }
}

fn payload(server: McpServerId, harness: &Harness, latency_ms: u64) -> Value {
    json!({
        "mcp_server_id": server,
        "capabilities_observed": ["file:read"],
        "connection_successful": true,
        "health_check_passed": true,
        "latency_ms": latency_ms,
        "timestamp": harness.clock.now(),
        "sdk_version": "0.4.0",
    })
}

fn signed(agent_id: AgentId, server: McpServerId, payload: Value, secret: &str) -> AttestationSubmission {
    let message = canonical_json(&payload).unwrap();
    AttestationSubmission {
        mcp_server_id: server,
        agent_id,
        signature: signature::sign(secret, &message).unwrap(),
        payload,
    }
}

#[tokio::test]
async fn test_new_agent_starts_near_068_and_violations_chain_down() {
    let harness = harness();
    let agent = register(&harness).await;
    assert!((agent.trust_score - 0.68).abs() <= 0.01);

    let mut score = agent.trust_score;
    for (capability, target) in [("file:read", 0.53), ("db:query", 0.33), ("network:access", 0.08)] {
        let decision = harness.engine.decisions.verify(&action(agent.id, capability)).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.trust_score_after < score);
        assert!((decision.trust_score_after - target).abs() <= 0.01);
        score = decision.trust_score_after;
    }

    let stored = harness.engine.registry.get(agent.id).await.unwrap();
    let latest = harness.engine.trust.latest(agent.id).await.unwrap();
    assert_eq!(stored.trust_score, latest.score);
    assert_eq!(harness.engine.trust.history(agent.id, 10).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_violation_chain_survives_draining_worker() {
    let mut harness = harness();
    let agent = register(&harness).await;

    for (capability, target) in [("file:read", 0.53), ("db:query", 0.33), ("network:access", 0.08)] {
        let decision = harness.engine.decisions.verify(&action(agent.id, capability)).await.unwrap();
        assert!((decision.trust_score_after - target).abs() <= 0.01);

        assert_eq!(harness.drain_recalculations().await, 1);
        let latest = harness.engine.trust.latest(agent.id).await.unwrap();
        assert_eq!(latest.source, SnapshotSource::FullRecalculation);
        assert!(
            (latest.score - target).abs() <= 0.01,
            "recalculation after {capability} moved the score to {}",
            latest.score
        );
        let stored = harness.engine.registry.get(agent.id).await.unwrap();
        assert_eq!(stored.trust_score, latest.score);
    }

    assert_eq!(harness.engine.trust.history(agent.id, 10).await.unwrap().len(), 7);
}

#[tokio::test]
async fn test_granted_capability_allows_and_revocation_denies() {
    let harness = harness();
    let agent = register(&harness).await;
    let grant = CapabilityGrantRequest {
        capability_type: "file:read".to_string(),
        scope: json!({ "paths": ["/srv/data"] }),
        granted_by: "operator".to_string(),
    };
    harness.engine.decisions.grant_capability(agent.id, &grant).await.unwrap();

    let allowed = harness.engine.decisions.verify(&action(agent.id, "file:read")).await.unwrap();
    assert!(allowed.allowed);
    assert_eq!(allowed.trust_score_after, agent.trust_score);

    harness.engine.decisions.revoke_capability(agent.id, "file:read").await.unwrap();
    let denied = harness.engine.decisions.verify(&action(agent.id, "file:read")).await.unwrap();
    assert!(!denied.allowed);
}

#[tokio::test]
async fn test_recalculation_keeps_mirror_in_sync() {
    let harness = harness();
    let agent = register(&harness).await;
    harness.engine.registry.transition(agent.id, AgentStatus::Verified).await.unwrap();
    harness.engine.decisions.verify(&action(agent.id, "db:query")).await.unwrap();

    let snapshot = harness.engine.trust.recalculate(agent.id).await.unwrap();
    let stored = harness.engine.registry.get(agent.id).await.unwrap();
    assert_eq!(stored.trust_score, snapshot.score);
    assert!((0.0..=1.0).contains(&snapshot.score));
}

#[tokio::test]
async fn test_previous_key_accepted_only_during_grace_period() {
    let harness = harness();
    let agent = register(&harness).await;
    harness.engine.registry.transition(agent.id, AgentStatus::Verified).await.unwrap();
    let server = McpServerId::new();

    let first = harness.engine.keys.generate_key_pair(agent.id).await.unwrap();
    let outcome = harness
        .engine
        .attestations
        .verify_attestation(&signed(agent.id, server, payload(server, &harness, 10), &first.private_key))
        .await
        .unwrap();
    assert!(outcome.verified);
    assert_eq!(outcome.key_slot, Some(KeySlot::Current));

    let second = harness.engine.keys.rotate_key_pair(agent.id).await.unwrap();
    assert_eq!(second.rotation_count, 1);
    let keys = harness.engine.keys.get_verification_keys(agent.id).await.unwrap();
    assert_eq!(keys.state, KeyState::Rotating);
    assert_eq!(keys.previous.as_deref(), Some(first.public_key.as_str()));

    harness.clock.advance(Duration::hours(23));
    let in_grace = harness
        .engine
        .attestations
        .verify_attestation(&signed(agent.id, server, payload(server, &harness, 11), &first.private_key))
        .await
        .unwrap();
    assert!(in_grace.verified);
    assert_eq!(in_grace.key_slot, Some(KeySlot::Previous));

    harness.clock.advance(Duration::hours(2));
    let after_grace = harness
        .engine
        .attestations
        .verify_attestation(&signed(agent.id, server, payload(server, &harness, 12), &first.private_key))
        .await
        .unwrap();
    assert!(!after_grace.verified);

    let current = harness
        .engine
        .attestations
        .verify_attestation(&signed(agent.id, server, payload(server, &harness, 13), &second.private_key))
        .await
        .unwrap();
    assert!(current.verified);

    let keys = harness.engine.keys.get_verification_keys(agent.id).await.unwrap();
    assert_eq!(keys.state, KeyState::Active);
    assert!(keys.previous.is_none());
}

#[tokio::test]
async fn test_agent_signed_rotation_proof() {
    let harness = harness();
    let agent = register(&harness).await;
    let issued = harness.engine.keys.generate_key_pair(agent.id).await.unwrap();

    let timestamp = harness.clock.now().timestamp();
    let message = rotation_proof_message(agent.id, timestamp);
    let proof = RotationProof {
        timestamp,
        signature: signature::sign(&issued.private_key, message.as_bytes()).unwrap(),
    };
    let rotated = harness.engine.keys.rotate_with_proof(agent.id, &proof).await.unwrap();
    assert_ne!(rotated.public_key, issued.public_key);

    let forged_message = rotation_proof_message(AgentId::new(), timestamp);
    let forged = RotationProof {
        timestamp,
        signature: signature::sign(&rotated.private_key, forged_message.as_bytes()).unwrap(),
    };
    assert!(matches!(
        harness.engine.keys.rotate_with_proof(agent.id, &forged).await,
        Err(EngineError::InvalidSignature(_))
    ));
}

#[tokio::test]
async fn test_rotation_proof_cannot_be_replayed() {
    let harness = harness();
    let agent = register(&harness).await;
    let issued = harness.engine.keys.generate_key_pair(agent.id).await.unwrap();

    let timestamp = harness.clock.now().timestamp();
    let proof = RotationProof {
        timestamp,
        signature: signature::sign(&issued.private_key, rotation_proof_message(agent.id, timestamp).as_bytes())
            .unwrap(),
    };
    let rotated = harness.engine.keys.rotate_with_proof(agent.id, &proof).await.unwrap();
    assert_eq!(rotated.rotation_count, 1);

    harness.clock.advance(Duration::seconds(30));
    assert!(matches!(
        harness.engine.keys.rotate_with_proof(agent.id, &proof).await,
        Err(EngineError::ReplayedAttestation(_))
    ));
    let keys = harness.engine.keys.get_verification_keys(agent.id).await.unwrap();
    assert_eq!(keys.current, rotated.public_key);
}

#[tokio::test]
async fn test_future_dated_attestation_cannot_be_replayed() {
    let harness = harness();
    let agent = register(&harness).await;
    harness.engine.registry.transition(agent.id, AgentStatus::Verified).await.unwrap();
    let issued = harness.engine.keys.generate_key_pair(agent.id).await.unwrap();
    let server = McpServerId::new();

    let mut body = payload(server, &harness, 20);
    body["timestamp"] = json!(harness.clock.now() + Duration::seconds(290));
    let submission = signed(agent.id, server, body, &issued.private_key);
    assert!(harness.engine.attestations.verify_attestation(&submission).await.unwrap().verified);

    harness.clock.advance(Duration::seconds(301));
    harness.engine.attestations.expire_stale().await.unwrap();
    let replay = harness.engine.attestations.verify_attestation(&submission).await.unwrap();
    assert!(!replay.verified);
    assert!(replay.reason.unwrap().contains("Replayed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_see_consistent_keys_during_rotation() {
    let harness = harness();
    let agent = register(&harness).await;
    let first = harness.engine.keys.generate_key_pair(agent.id).await.unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let keys = harness.engine.keys.clone();
            let first_public = first.public_key.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let set = keys.get_verification_keys(agent.id).await.unwrap();
                    if set.current != first_public {
                        assert_eq!(set.previous.as_deref(), Some(first_public.as_str()));
                        assert_eq!(set.state, KeyState::Rotating);
                    } else {
                        assert!(set.previous.is_none());
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let rotated = harness.engine.keys.rotate_key_pair(agent.id).await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    let set = harness.engine.keys.get_verification_keys(agent.id).await.unwrap();
    assert_eq!(set.current, rotated.public_key);
}

#[tokio::test]
async fn test_compromised_agent_is_locked_out() {
    let harness = harness();
    let agent = register(&harness).await;
    harness.engine.registry.transition(agent.id, AgentStatus::Verified).await.unwrap();
    let issued = harness.engine.keys.generate_key_pair(agent.id).await.unwrap();
    harness.engine.keys.rotate_key_pair(agent.id).await.unwrap();

    let marked = harness.engine.keys.mark_compromised(agent.id).await.unwrap();
    assert!(marked.is_compromised);
    let keys = harness.engine.keys.get_verification_keys(agent.id).await.unwrap();
    assert!(keys.previous.is_none());

    let decision = harness.engine.decisions.verify(&action(agent.id, "file:read")).await.unwrap();
    assert!(!decision.allowed);
    assert!(decision.violation_id.is_none());

    let server = McpServerId::new();
    let outcome = harness
        .engine
        .attestations
        .verify_attestation(&signed(agent.id, server, payload(server, &harness, 5), &issued.private_key))
        .await
        .unwrap();
    assert!(!outcome.verified);

    assert!(matches!(
        harness.engine.keys.rotate_key_pair(agent.id).await,
        Err(EngineError::AgentCompromised(_))
    ));
}

#[tokio::test]
async fn test_drift_detection_through_engine() {
    let harness = harness();
    let agent = register(&harness).await;
    for value in [100.0, 102.0, 98.0] {
        harness.engine.drift.update_baseline(agent.id, "latency_ms", value).await.unwrap();
    }
    assert_eq!(harness.engine.drift.refresh_baselines().await.unwrap(), 1);

    harness.clock.advance(Duration::minutes(5));
    harness.engine.drift.update_baseline(agent.id, "latency_ms", 180.0).await.unwrap();
    let results = harness.engine.drift.evaluate(agent.id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_anomaly);
    assert!((results[0].baseline_value - 100.0).abs() < 1e-9);
    assert!((results[0].deviation_pct - 0.8).abs() < 1e-9);
}
