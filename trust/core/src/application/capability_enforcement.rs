// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Enforcement Decision Engine
//!
//! Answers "may this agent perform this action right now?".
//!
//! ```text
//! verify(request)
//!   ├─ agent unknown ─────────────────────► Err(UnknownAgent)
//!   ├─ agent suspended/revoked/compromised ► denied, nothing recorded
//!   ├─ action in capability set ──────────► allowed
//!   └─ otherwise
//!        classify → policy → deny → persist violation
//!        → immediate penalty → enqueue recalculation → event/audit/metrics
//! ```
//!
//! A capability violation is always denied. A matched policy only decides how
//! loudly. If the policy evaluator fails the engine still denies, with
//! `block_and_alert`. The trust penalty fails open: if it cannot be written the
//! decision carries a local estimate instead.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::application::policy_evaluator::SecurityPolicyEvaluator;
use crate::application::trust_score::{TrustRecalculationQueue, TrustScoreCalculator};
use crate::domain::agent::{Agent, AgentId};
use crate::domain::capability::{classify_action, CapabilityViolation, ViolationId};
use crate::domain::clock::Clock;
use crate::domain::errors::EngineError;
use crate::domain::events::CapabilityEvent;
use crate::domain::policy::{EnforcementAction, PolicyDecision, SecurityEvent, SecurityEventKind};
use crate::domain::repository::{AgentRepository, RepositoryError, SignalRepository, ViolationRepository};
use crate::domain::trust::clamp_score;
use crate::infrastructure::audit::TrustAuditLogger;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub agent_id: AgentId,
    pub action_type: String,
    pub resource: String,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDecision {
    pub allowed: bool,
    pub reason: String,
    pub trust_score_after: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_id: Option<ViolationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforcement_action: Option<EnforcementAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityGrantRequest {
    pub capability_type: String,
    #[serde(default)]
    pub scope: Value,
    #[serde(default = "default_granted_by")]
    pub granted_by: String,
}

fn default_granted_by() -> String {
    "operator".to_string()
}

pub struct DecisionEngine {
    agent_repo: Arc<dyn AgentRepository>,
    violation_repo: Arc<dyn ViolationRepository>,
    signal_repo: Arc<dyn SignalRepository>,
    policy_evaluator: Arc<SecurityPolicyEvaluator>,
    calculator: Arc<TrustScoreCalculator>,
    recalculation: TrustRecalculationQueue,
    event_bus: Arc<EventBus>,
    audit: TrustAuditLogger,
    clock: Arc<dyn Clock>,
}

impl DecisionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        violation_repo: Arc<dyn ViolationRepository>,
        signal_repo: Arc<dyn SignalRepository>,
        policy_evaluator: Arc<SecurityPolicyEvaluator>,
        calculator: Arc<TrustScoreCalculator>,
        recalculation: TrustRecalculationQueue,
        event_bus: Arc<EventBus>,
        audit: TrustAuditLogger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            agent_repo,
            violation_repo,
            signal_repo,
            policy_evaluator,
            calculator,
            recalculation,
            event_bus,
            audit,
            clock,
        }
    }

    async fn load_agent(&self, agent_id: AgentId) -> Result<Agent, EngineError> {
        self.agent_repo
            .find_by_id(agent_id)
            .await?
            .ok_or(EngineError::UnknownAgent(agent_id))
    }

    pub async fn verify(&self, request: &ActionRequest) -> Result<ActionDecision, EngineError> {
        let agent = match self.load_agent(request.agent_id).await {
            Ok(agent) => agent,
            Err(e) => {
                metrics::counter!("aegis_trust_actions_total", "outcome" => "unknown_agent").increment(1);
                return Err(e);
            }
        };

        if let Err(inactive) = agent.ensure_may_act() {
            debug!(agent_id = %agent.id, action = %request.action_type, "Action denied for inactive agent");
            metrics::counter!("aegis_trust_actions_total", "outcome" => "inactive").increment(1);
            return Ok(ActionDecision {
                allowed: false,
                reason: inactive.to_string(),
                trust_score_after: agent.trust_score,
                violation_id: None,
                enforcement_action: None,
            });
        }

        if agent.has_capability(&request.action_type) {
            if let Err(e) = self.signal_repo.record_action(agent.id, true).await {
                warn!(agent_id = %agent.id, error = %e, "Failed to record allowed action");
            }
            metrics::counter!("aegis_trust_actions_total", "outcome" => "allowed").increment(1);
            return Ok(ActionDecision {
                allowed: true,
                reason: format!("Capability '{}' granted", request.action_type),
                trust_score_after: agent.trust_score,
                violation_id: None,
                enforcement_action: None,
            });
        }

        self.deny_violation(&agent, request).await
    }

    async fn deny_violation(&self, agent: &Agent, request: &ActionRequest) -> Result<ActionDecision, EngineError> {
        let now = self.clock.now();
        let class = classify_action(&request.action_type);

        let event = SecurityEvent {
            organization_id: agent.organization_id,
            agent_id: agent.id,
            agent_type: agent.agent_type.clone(),
            severity: class.severity,
            kind: SecurityEventKind::CapabilityViolation {
                capability: request.action_type.clone(),
                resource: request.resource.clone(),
            },
            occurred_at: now,
        };
        let policy = match self.policy_evaluator.evaluate(&event).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(agent_id = %agent.id, error = %e, "Policy evaluation failed; blocking");
                PolicyDecision {
                    matched_policy: None,
                    policy_name: None,
                    enforcement_action: EnforcementAction::BlockAndAlert,
                }
            }
        };

        let violation = CapabilityViolation {
            id: ViolationId::new(),
            agent_id: agent.id,
            attempted_capability: request.action_type.clone(),
            resource: request.resource.clone(),
            registered_capabilities: agent.active_capabilities(),
            severity: class.severity,
            trust_score_impact: class.trust_delta,
            blocked: true,
            source_context: request.context.clone(),
            matched_policy_id: policy.matched_policy,
            occurred_at: now,
        };
        self.violation_repo.append(&violation).await?;

        if let Err(e) = self.signal_repo.record_action(agent.id, false).await {
            warn!(agent_id = %agent.id, error = %e, "Failed to record denied action");
        }

        let trust_score_after = match self.calculator.apply_penalty(agent.id, class.trust_delta).await {
            Ok(snapshot) => snapshot.score,
            Err(e) => {
                warn!(agent_id = %agent.id, error = %e, "Trust penalty not persisted; returning estimate");
                clamp_score(agent.trust_score - class.trust_delta)
            }
        };
        self.recalculation.enqueue(agent.id);

        self.audit.log_violation(&violation, policy.enforcement_action);
        metrics::counter!("aegis_trust_actions_total", "outcome" => "denied").increment(1);
        metrics::counter!(
            "aegis_trust_violations_total",
            "severity" => class.severity.as_str(),
            "action" => policy.enforcement_action.as_str()
        )
        .increment(1);
        self.event_bus.publish_capability_event(CapabilityEvent::ViolationRecorded {
            violation_id: violation.id,
            agent_id: agent.id,
            attempted_capability: violation.attempted_capability.clone(),
            severity: violation.severity,
            enforcement_action: policy.enforcement_action,
            occurred_at: now,
        });

        let reason = match &policy.policy_name {
            Some(name) => format!(
                "Capability '{}' is not granted ({} violation, policy '{}': {})",
                request.action_type,
                class.severity,
                name,
                policy.enforcement_action.as_str()
            ),
            None => format!(
                "Capability '{}' is not granted ({} violation: {})",
                request.action_type,
                class.severity,
                policy.enforcement_action.as_str()
            ),
        };

        Ok(ActionDecision {
            allowed: false,
            reason,
            trust_score_after,
            violation_id: Some(violation.id),
            enforcement_action: Some(policy.enforcement_action),
        })
    }

    /// Write `agent` back, reporting a lost race as `ConcurrentModification`.
    async fn save(&self, agent: &Agent, expected_version: u64) -> Result<Agent, EngineError> {
        match self.agent_repo.compare_and_swap(agent, expected_version).await {
            Ok(updated) => Ok(updated),
            Err(RepositoryError::VersionConflict { .. }) => Err(EngineError::ConcurrentModification(agent.id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn grant_capability(
        &self,
        agent_id: AgentId,
        grant: &CapabilityGrantRequest,
    ) -> Result<DateTime<Utc>, EngineError> {
        let capability_type = grant.capability_type.trim();
        if capability_type.is_empty() {
            return Err(EngineError::InvalidInput("capability_type must not be empty".to_string()));
        }

        let mut agent = self.load_agent(agent_id).await?;
        let already_granted = agent.has_capability(capability_type);
        let now = self.clock.now();
        let granted_at = agent.grant_capability(capability_type, grant.scope.clone(), &grant.granted_by, now)?;
        if already_granted {
            return Ok(granted_at);
        }

        let expected_version = agent.version;
        self.save(&agent, expected_version).await?;

        debug!(agent_id = %agent_id, capability = capability_type, "Capability granted");
        self.event_bus.publish_capability_event(CapabilityEvent::CapabilityGranted {
            agent_id,
            capability_type: capability_type.to_string(),
            granted_at,
        });
        Ok(granted_at)
    }

    pub async fn revoke_capability(&self, agent_id: AgentId, capability_type: &str) -> Result<DateTime<Utc>, EngineError> {
        let mut agent = self.load_agent(agent_id).await?;
        let revoked_at = agent.revoke_capability(capability_type, self.clock.now())?;

        let expected_version = agent.version;
        self.save(&agent, expected_version).await?;

        debug!(agent_id = %agent_id, capability = capability_type, "Capability revoked");
        self.event_bus.publish_capability_event(CapabilityEvent::CapabilityRevoked {
            agent_id,
            capability_type: capability_type.to_string(),
            revoked_at,
        });
        Ok(revoked_at)
    }

    pub async fn recent_violations(&self, agent_id: AgentId, limit: usize) -> Result<Vec<CapabilityViolation>, EngineError> {
        Ok(self.violation_repo.find_recent(agent_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentStatus, OrganizationId};
    use crate::domain::capability::Severity;
    use crate::domain::clock::ManualClock;
    use crate::domain::config::TrustConfig;
    use crate::domain::policy::{PolicyRule, PolicyScope, SecurityPolicy};
    use crate::domain::repository::PolicyRepository;
    use crate::infrastructure::repositories::{
        InMemoryAgentRepository, InMemoryBaselineRepository, InMemoryPolicyRepository,
        InMemorySignalRepository, InMemoryViolationRepository,
    };
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        engine: DecisionEngine,
        agents: InMemoryAgentRepository,
        violations: InMemoryViolationRepository,
        signals: InMemorySignalRepository,
        policies: InMemoryPolicyRepository,
        calculator: Arc<TrustScoreCalculator>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let agents = InMemoryAgentRepository::new();
        let violations = InMemoryViolationRepository::new();
        let signals = InMemorySignalRepository::new();
        let policies = InMemoryPolicyRepository::new();
        let clock = ManualClock::new(Utc::now());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let bus = Arc::new(EventBus::new(256));
        let evaluator = Arc::new(SecurityPolicyEvaluator::new(
            Arc::new(policies.clone()),
            bus.clone(),
            shared_clock.clone(),
            Duration::from_secs(1),
        ));
        let calculator = Arc::new(TrustScoreCalculator::new(
            Arc::new(agents.clone()),
            Arc::new(violations.clone()),
            Arc::new(InMemoryBaselineRepository::new()),
            Arc::new(signals.clone()),
            evaluator.clone(),
            bus.clone(),
            shared_clock.clone(),
            TrustConfig::default(),
        ));
        // Nothing drains the queue, so penalties are the only trust writes.
        let (queue, _receiver) = TrustRecalculationQueue::new(64);
        let engine = DecisionEngine::new(
            Arc::new(agents.clone()),
            Arc::new(violations.clone()),
            Arc::new(signals.clone()),
            evaluator,
            calculator.clone(),
            queue,
            bus,
            TrustAuditLogger::new(),
            shared_clock,
        );
        Fixture {
            engine,
            agents,
            violations,
            signals,
            policies,
            calculator,
            clock,
        }
    }

    async fn register(fixture: &Fixture) -> Agent {
        let agent = Agent::new(OrganizationId::new(), "analyst", "research", fixture.clock.now());
        let initial = fixture.calculator.initial_snapshot(&agent);
        fixture.agents.insert(&agent, &initial).await.unwrap()
    }

    fn request(agent_id: AgentId, action: &str) -> ActionRequest {
        ActionRequest {
            agent_id,
            action_type: action.to_string(),
            resource: "/data/customers.csv".to_string(),
            context: json!({"session": "s-1"}),
        }
    }

    fn grant(capability: &str) -> CapabilityGrantRequest {
        CapabilityGrantRequest {
            capability_type: capability.to_string(),
            scope: json!({}),
            granted_by: "admin".to_string(),
        }
    }

    #[tokio::test]
    async fn test_member_action_allowed_without_violation() {
        let fixture = fixture();
        let agent = register(&fixture).await;
        fixture.engine.grant_capability(agent.id, &grant("file:read")).await.unwrap();

        let decision = fixture.engine.verify(&request(agent.id, "file:read")).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.violation_id.is_none());
        assert!(fixture.violations.find_recent(agent.id, 10).await.unwrap().is_empty());
        assert_eq!(fixture.signals.get(agent.id).await.unwrap().actions_allowed, 1);
    }

    #[tokio::test]
    async fn test_violation_chain_lowers_trust() {
        let fixture = fixture();
        let agent = register(&fixture).await;
        assert!((agent.trust_score - 0.68).abs() <= 0.01);

        let mut expected = agent.trust_score;
        for (action, delta, target) in [
            ("file:read", 0.15, 0.53),
            ("db:query", 0.20, 0.33),
            ("network:access", 0.25, 0.08),
        ] {
            expected -= delta;
            let decision = fixture.engine.verify(&request(agent.id, action)).await.unwrap();
            assert!(!decision.allowed);
            assert!((decision.trust_score_after - expected).abs() < 1e-9);
            assert!((decision.trust_score_after - target).abs() <= 0.01);

            let stored = fixture.agents.find_by_id(agent.id).await.unwrap().unwrap();
            let latest = fixture.agents.latest_snapshot(agent.id).await.unwrap().unwrap();
            assert_eq!(stored.trust_score, latest.score);
        }

        let decision = fixture.engine.verify(&request(agent.id, "system:exec")).await.unwrap();
        assert_eq!(decision.trust_score_after, 0.0);
        assert_eq!(fixture.violations.find_recent(agent.id, 10).await.unwrap().len(), 4);
        assert_eq!(fixture.signals.get(agent.id).await.unwrap().actions_denied, 4);
    }

    #[tokio::test]
    async fn test_unknown_agent_fails_closed() {
        let fixture = fixture();
        assert!(matches!(
            fixture.engine.verify(&request(AgentId::new(), "file:read")).await,
            Err(EngineError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_suspended_agent_denied_without_violation() {
        let fixture = fixture();
        let mut agent = register(&fixture).await;
        fixture.engine.grant_capability(agent.id, &grant("file:read")).await.unwrap();
        agent = fixture.agents.find_by_id(agent.id).await.unwrap().unwrap();
        agent.transition_to(AgentStatus::Suspended, fixture.clock.now()).unwrap();
        fixture.agents.compare_and_swap(&agent, agent.version).await.unwrap();

        let decision = fixture.engine.verify(&request(agent.id, "file:read")).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.violation_id.is_none());
        assert!(fixture.violations.find_recent(agent.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_matching_policy_escalates_but_never_allows() {
        let fixture = fixture();
        let agent = register(&fixture).await;
        let policy = SecurityPolicy::new(
            agent.organization_id,
            "block critical",
            PolicyRule::CapabilityViolation { capabilities: None },
            EnforcementAction::BlockAndAlert,
            Severity::Critical,
            PolicyScope::AllAgents,
            100,
            fixture.clock.now(),
        )
        .unwrap();
        fixture.policies.save(&policy).await.unwrap();

        let decision = fixture.engine.verify(&request(agent.id, "db:write")).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.enforcement_action, Some(EnforcementAction::BlockAndAlert));
        let recorded = fixture.violations.find_recent(agent.id, 1).await.unwrap();
        assert_eq!(recorded[0].matched_policy_id, Some(policy.id));

        let decision = fixture.engine.verify(&request(agent.id, "api:call")).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.enforcement_action, Some(EnforcementAction::AlertOnly));
    }

    #[tokio::test]
    async fn test_grant_is_idempotent_and_revoke_takes_effect() {
        let fixture = fixture();
        let agent = register(&fixture).await;
        let first = fixture.engine.grant_capability(agent.id, &grant("db:query")).await.unwrap();
        fixture.clock.advance(chrono::Duration::minutes(5));
        let second = fixture.engine.grant_capability(agent.id, &grant("db:query")).await.unwrap();
        assert_eq!(first, second);

        fixture.engine.revoke_capability(agent.id, "db:query").await.unwrap();
        let decision = fixture.engine.verify(&request(agent.id, "db:query")).await.unwrap();
        assert!(!decision.allowed);

        assert!(matches!(
            fixture.engine.revoke_capability(agent.id, "db:query").await,
            Err(EngineError::CapabilityNotGranted { .. })
        ));
    }

    #[tokio::test]
    async fn test_grant_rejected_for_revoked_agent() {
        let fixture = fixture();
        let mut agent = register(&fixture).await;
        agent.transition_to(AgentStatus::Revoked, fixture.clock.now()).unwrap();
        fixture.agents.compare_and_swap(&agent, agent.version).await.unwrap();

        assert!(matches!(
            fixture.engine.grant_capability(agent.id, &grant("file:read")).await,
            Err(EngineError::AgentInactive { .. })
        ));
    }
}
