// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Security Policy Evaluator
//!
//! Turns a [`SecurityEvent`] into an [`EnforcementAction`] by matching it
//! against the organization's policies.
//!
//! Candidates are filtered by enabled flag, scope, rule applicability and
//! `severity >= severity_threshold`, then ordered by descending priority. The
//! first one wins; ties go to the older policy. With no match, capability
//! violations get `alert_only` and every other event gets `allow`.
//!
//! Two entry points:
//! - [`SecurityPolicyEvaluator::evaluate`] propagates failures. The decision
//!   engine uses it and fails closed.
//! - [`SecurityPolicyEvaluator::evaluate_advisory`] swallows failures into the
//!   default action. Trust drops, drift and attestation failures use it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::agent::OrganizationId;
use crate::domain::clock::Clock;
use crate::domain::errors::EngineError;
use crate::domain::events::PolicyEvent;
use crate::domain::policy::{PolicyDecision, SecurityEvent, SecurityPolicy};
use crate::domain::repository::PolicyRepository;
use crate::infrastructure::event_bus::EventBus;

/// Pick the winning policy for `event` out of `policies`.
pub fn select_policy(policies: &[SecurityPolicy], event: &SecurityEvent) -> PolicyDecision {
    policies
        .iter()
        .filter(|p| p.applies_to(event))
        .min_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)))
        .map(PolicyDecision::matched)
        .unwrap_or_else(|| PolicyDecision::unmatched(&event.kind))
}

pub struct SecurityPolicyEvaluator {
    policy_repo: Arc<dyn PolicyRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    lookup_timeout: Duration,
}

impl SecurityPolicyEvaluator {
    pub fn new(
        policy_repo: Arc<dyn PolicyRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            policy_repo,
            event_bus,
            clock,
            lookup_timeout,
        }
    }

    pub async fn evaluate(&self, event: &SecurityEvent) -> Result<PolicyDecision, EngineError> {
        let policies = tokio::time::timeout(
            self.lookup_timeout,
            self.policy_repo.list_by_organization(event.organization_id),
        )
        .await
        .map_err(|_| EngineError::Timeout(self.lookup_timeout))?
        .map_err(|e| EngineError::PolicyEvaluationFailure(e.to_string()))?;

        let decision = select_policy(&policies, event);

        if let Some(policy_id) = decision.matched_policy {
            debug!(
                policy_id = %policy_id,
                agent_id = %event.agent_id,
                event_type = event.kind.name(),
                action = decision.enforcement_action.as_str(),
                "Security policy matched"
            );
            metrics::counter!(
                "aegis_trust_policy_matches_total",
                "action" => decision.enforcement_action.as_str()
            )
            .increment(1);
            self.event_bus.publish_policy_event(PolicyEvent::PolicyMatched {
                policy_id,
                agent_id: event.agent_id,
                event_type: event.kind.name().to_string(),
                enforcement_action: decision.enforcement_action,
                matched_at: self.clock.now(),
            });
        }

        Ok(decision)
    }

    /// Evaluate an informational event. Failures fall back to the default action.
    pub async fn evaluate_advisory(&self, event: &SecurityEvent) -> PolicyDecision {
        match self.evaluate(event).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    agent_id = %event.agent_id,
                    event_type = event.kind.name(),
                    error = %e,
                    "Advisory policy evaluation failed; using default action"
                );
                PolicyDecision::unmatched(&event.kind)
            }
        }
    }

    pub async fn save_policy(&self, policy: &SecurityPolicy) -> Result<(), EngineError> {
        self.policy_repo.save(policy).await?;
        Ok(())
    }

    pub async fn list_policies(&self, organization_id: OrganizationId) -> Result<Vec<SecurityPolicy>, EngineError> {
        Ok(self.policy_repo.list_by_organization(organization_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;
    use crate::domain::capability::Severity;
    use crate::domain::clock::ManualClock;
    use crate::domain::policy::{EnforcementAction, PolicyRule, PolicyScope, SecurityEventKind};
    use crate::domain::repository::RepositoryError;
    use crate::infrastructure::repositories::InMemoryPolicyRepository;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    fn violation_event(org: OrganizationId, severity: Severity) -> SecurityEvent {
        SecurityEvent {
            organization_id: org,
            agent_id: AgentId::new(),
            agent_type: "research".to_string(),
            severity,
            kind: SecurityEventKind::CapabilityViolation {
                capability: "db:write".to_string(),
                resource: "orders".to_string(),
            },
            occurred_at: Utc::now(),
        }
    }

    fn policy(
        org: OrganizationId,
        name: &str,
        action: EnforcementAction,
        threshold: Severity,
        priority: i32,
    ) -> SecurityPolicy {
        SecurityPolicy::new(
            org,
            name,
            PolicyRule::CapabilityViolation { capabilities: None },
            action,
            threshold,
            PolicyScope::AllAgents,
            priority,
            Utc::now(),
        )
        .unwrap()
    }

    fn evaluator(repo: Arc<dyn PolicyRepository>) -> SecurityPolicyEvaluator {
        SecurityPolicyEvaluator::new(
            repo,
            Arc::new(EventBus::new(16)),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_highest_priority_wins() {
        let org = OrganizationId::new();
        let policies = vec![
            policy(org, "low", EnforcementAction::AlertOnly, Severity::Low, 1),
            policy(org, "high", EnforcementAction::BlockAndAlert, Severity::Low, 10),
        ];
        let decision = select_policy(&policies, &violation_event(org, Severity::Critical));
        assert_eq!(decision.policy_name.as_deref(), Some("high"));
        assert_eq!(decision.enforcement_action, EnforcementAction::BlockAndAlert);
    }

    #[test]
    fn test_equal_priority_prefers_older_policy() {
        let org = OrganizationId::new();
        let mut older = policy(org, "older", EnforcementAction::AlertOnly, Severity::Low, 5);
        older.created_at -= ChronoDuration::hours(1);
        let newer = policy(org, "newer", EnforcementAction::BlockAndAlert, Severity::Low, 5);
        let decision = select_policy(&[newer, older], &violation_event(org, Severity::High));
        assert_eq!(decision.policy_name.as_deref(), Some("older"));
    }

    #[test]
    fn test_severity_threshold_filters() {
        let org = OrganizationId::new();
        let policies = vec![policy(org, "critical only", EnforcementAction::BlockAndAlert, Severity::Critical, 10)];
        let decision = select_policy(&policies, &violation_event(org, Severity::Medium));
        assert!(decision.matched_policy.is_none());
        assert_eq!(decision.enforcement_action, EnforcementAction::AlertOnly);
    }

    #[test]
    fn test_disabled_and_foreign_policies_ignored() {
        let org = OrganizationId::new();
        let mut disabled = policy(org, "disabled", EnforcementAction::BlockAndAlert, Severity::Low, 10);
        disabled.enabled = false;
        let foreign = policy(OrganizationId::new(), "foreign", EnforcementAction::BlockAndAlert, Severity::Low, 10);
        let decision = select_policy(&[disabled, foreign], &violation_event(org, Severity::Critical));
        assert!(decision.matched_policy.is_none());
    }

    #[test]
    fn test_non_violation_default_is_allow() {
        let org = OrganizationId::new();
        let event = SecurityEvent {
            kind: SecurityEventKind::TrustScoreDrop {
                previous_score: 0.6,
                score: 0.4,
            },
            ..violation_event(org, Severity::Medium)
        };
        assert_eq!(select_policy(&[], &event).enforcement_action, EnforcementAction::Allow);
    }

    #[tokio::test]
    async fn test_evaluate_publishes_match() {
        let org = OrganizationId::new();
        let repo = InMemoryPolicyRepository::new();
        repo.save(&policy(org, "block", EnforcementAction::BlockAndAlert, Severity::Low, 1))
            .await
            .unwrap();
        let evaluator = evaluator(Arc::new(repo));
        let mut receiver = evaluator.event_bus.subscribe();

        let decision = evaluator.evaluate(&violation_event(org, Severity::High)).await.unwrap();
        assert_eq!(decision.enforcement_action, EnforcementAction::BlockAndAlert);
        assert!(receiver.try_recv().is_ok());
    }

    struct FailingPolicyRepository;

    #[async_trait]
    impl PolicyRepository for FailingPolicyRepository {
        async fn save(&self, _policy: &SecurityPolicy) -> Result<(), RepositoryError> {
            Err(RepositoryError::Database("down".to_string()))
        }

        async fn find_by_id(
            &self,
            _id: crate::domain::policy::PolicyId,
        ) -> Result<Option<SecurityPolicy>, RepositoryError> {
            Err(RepositoryError::Database("down".to_string()))
        }

        async fn list_by_organization(&self, _organization_id: OrganizationId) -> Result<Vec<SecurityPolicy>, RepositoryError> {
            Err(RepositoryError::Database("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failure_propagates_but_advisory_falls_back() {
        let evaluator = evaluator(Arc::new(FailingPolicyRepository));
        let event = violation_event(OrganizationId::new(), Severity::High);

        assert!(matches!(
            evaluator.evaluate(&event).await,
            Err(EngineError::PolicyEvaluationFailure(_))
        ));
        let fallback = evaluator.evaluate_advisory(&event).await;
        assert_eq!(fallback.enforcement_action, EnforcementAction::AlertOnly);
    }
}
