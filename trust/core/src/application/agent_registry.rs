// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent registration, lifecycle transitions and operational signal reports.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::trust_score::{TrustRecalculationQueue, TrustScoreCalculator};
use crate::domain::agent::{Agent, AgentId, AgentStatus, OrganizationId};
use crate::domain::clock::Clock;
use crate::domain::errors::EngineError;
use crate::domain::events::AgentLifecycleEvent;
use crate::domain::repository::{AgentRepository, RepositoryError, SignalRepository};
use crate::domain::signals::{OperationalSignals, SignalReport};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    pub organization_id: OrganizationId,
    pub name: String,
    pub agent_type: String,
}

pub struct AgentRegistry {
    agent_repo: Arc<dyn AgentRepository>,
    signal_repo: Arc<dyn SignalRepository>,
    calculator: Arc<TrustScoreCalculator>,
    recalculation: TrustRecalculationQueue,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl AgentRegistry {
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        signal_repo: Arc<dyn SignalRepository>,
        calculator: Arc<TrustScoreCalculator>,
        recalculation: TrustRecalculationQueue,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            agent_repo,
            signal_repo,
            calculator,
            recalculation,
            event_bus,
            clock,
        }
    }

    /// Create a pending agent together with its first trust snapshot.
    pub async fn register(&self, request: &RegisterAgentRequest) -> Result<Agent, EngineError> {
        let name = request.name.trim();
        let agent_type = request.agent_type.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("agent name must not be empty".to_string()));
        }
        if agent_type.is_empty() {
            return Err(EngineError::InvalidInput("agent_type must not be empty".to_string()));
        }

        let agent = Agent::new(request.organization_id, name, agent_type, self.clock.now());
        let initial = self.calculator.initial_snapshot(&agent);
        let stored = self.agent_repo.insert(&agent, &initial).await?;

        info!(agent_id = %stored.id, organization_id = %stored.organization_id, trust_score = stored.trust_score, "Agent registered");
        self.event_bus.publish_agent_event(AgentLifecycleEvent::AgentRegistered {
            agent_id: stored.id,
            agent_type: stored.agent_type.clone(),
            registered_at: stored.created_at,
        });
        Ok(stored)
    }

    pub async fn get(&self, agent_id: AgentId) -> Result<Agent, EngineError> {
        self.agent_repo
            .find_by_id(agent_id)
            .await?
            .ok_or(EngineError::UnknownAgent(agent_id))
    }

    pub async fn list(&self, organization_id: OrganizationId) -> Result<Vec<Agent>, EngineError> {
        Ok(self.agent_repo.list_by_organization(organization_id).await?)
    }

    pub async fn transition(&self, agent_id: AgentId, next: AgentStatus) -> Result<Agent, EngineError> {
        let mut agent = self.get(agent_id).await?;
        let from = agent.status;
        let now = self.clock.now();
        agent.transition_to(next, now)?;

        let expected_version = agent.version;
        let updated = match self.agent_repo.compare_and_swap(&agent, expected_version).await {
            Ok(updated) => updated,
            Err(RepositoryError::VersionConflict { .. }) => return Err(EngineError::ConcurrentModification(agent_id)),
            Err(e) => return Err(e.into()),
        };

        info!(agent_id = %agent_id, from = %from, to = %next, "Agent status changed");
        self.event_bus.publish_agent_event(AgentLifecycleEvent::AgentStatusChanged {
            agent_id,
            from,
            to: next,
            changed_at: now,
        });
        // Verification is the heaviest trust factor.
        self.recalculation.enqueue(agent_id);
        Ok(updated)
    }

    /// Merge reported uptime, compliance or feedback into the agent's signals.
    pub async fn report_signals(&self, agent_id: AgentId, report: &SignalReport) -> Result<OperationalSignals, EngineError> {
        report.validate()?;
        self.get(agent_id).await?;
        let signals = self
            .signal_repo
            .merge_report(agent_id, report, self.clock.now())
            .await?;
        self.recalculation.enqueue(agent_id);
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::policy_evaluator::SecurityPolicyEvaluator;
    use crate::domain::clock::ManualClock;
    use crate::domain::config::TrustConfig;
    use crate::infrastructure::repositories::{
        InMemoryAgentRepository, InMemoryBaselineRepository, InMemoryPolicyRepository,
        InMemorySignalRepository, InMemoryViolationRepository,
    };
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn registry() -> (AgentRegistry, mpsc::Receiver<AgentId>) {
        let agents = InMemoryAgentRepository::new();
        let signals = InMemorySignalRepository::new();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let bus = Arc::new(EventBus::new(64));
        let evaluator = Arc::new(SecurityPolicyEvaluator::new(
            Arc::new(InMemoryPolicyRepository::new()),
            bus.clone(),
            clock.clone(),
            Duration::from_secs(1),
        ));
        let calculator = Arc::new(TrustScoreCalculator::new(
            Arc::new(agents.clone()),
            Arc::new(InMemoryViolationRepository::new()),
            Arc::new(InMemoryBaselineRepository::new()),
            Arc::new(signals.clone()),
            evaluator,
            bus.clone(),
            clock.clone(),
            TrustConfig::default(),
        ));
        let (queue, receiver) = TrustRecalculationQueue::new(16);
        let registry = AgentRegistry::new(Arc::new(agents), Arc::new(signals), calculator, queue, bus, clock);
        (registry, receiver)
    }

    fn request(name: &str) -> RegisterAgentRequest {
        RegisterAgentRequest {
            organization_id: OrganizationId::new(),
            name: name.to_string(),
            agent_type: "research".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_sets_initial_trust() {
        let (registry, _receiver) = registry();
        let agent = registry.register(&request("crawler")).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Pending);
        assert_eq!(agent.version, 1);
        assert!((agent.trust_score - 0.675).abs() < 1e-9);
        assert!(registry.register(&request("  ")).await.is_err());
    }

    #[tokio::test]
    async fn test_transition_rules_and_recalculation_request() {
        let (registry, mut receiver) = registry();
        let agent = registry.register(&request("crawler")).await.unwrap();

        let verified = registry.transition(agent.id, AgentStatus::Verified).await.unwrap();
        assert_eq!(verified.status, AgentStatus::Verified);
        assert_eq!(receiver.try_recv().unwrap(), agent.id);

        registry.transition(agent.id, AgentStatus::Revoked).await.unwrap();
        assert!(matches!(
            registry.transition(agent.id, AgentStatus::Verified).await,
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_report_signals_validates() {
        let (registry, _receiver) = registry();
        let agent = registry.register(&request("crawler")).await.unwrap();

        let bad = SignalReport {
            uptime_ratio: Some(2.0),
            ..Default::default()
        };
        assert!(matches!(
            registry.report_signals(agent.id, &bad).await,
            Err(EngineError::InvalidInput(_))
        ));

        let good = SignalReport {
            uptime_ratio: Some(0.99),
            feedback_rating: Some(4),
            ..Default::default()
        };
        let signals = registry.report_signals(agent.id, &good).await.unwrap();
        assert_eq!(signals.uptime_ratio, Some(0.99));
        assert_eq!(signals.feedback_count, 1);
    }
}
