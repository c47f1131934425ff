// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trust Score Calculator
//!
//! Combines verification state, operational signals, recent violations and
//! drift results into one score in `[0, 1]`.
//!
//! ## Write paths
//!
//! ```text
//! violation ──► apply_penalty ──► snapshot(score - delta) ──┐
//!                                                          ├─► commit_trust_snapshot (snapshot + mirror, versioned)
//! queue ─────► recalculate ────► snapshot(all factors) ────┘
//! ```
//!
//! Both paths retry a lost version race up to `max_write_retries` times. Trust
//! writes only ever replace the score, so a retry cannot clobber other state.
//! `recalculate_or_last_known` is the fail-open wrapper: any error or timeout
//! returns the newest stored snapshot instead.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::policy_evaluator::SecurityPolicyEvaluator;
use crate::domain::agent::{Agent, AgentId};
use crate::domain::capability::Severity;
use crate::domain::clock::Clock;
use crate::domain::config::{time_before, TrustConfig};
use crate::domain::errors::EngineError;
use crate::domain::events::TrustEvent;
use crate::domain::policy::{SecurityEvent, SecurityEventKind};
use crate::domain::repository::{
    AgentRepository, BaselineRepository, RepositoryError, SignalRepository, ViolationRepository,
};
use crate::domain::signals::OperationalSignals;
use crate::domain::trust::{
    compute_factors, recalculated_score, SnapshotSource, TrustInputs, TrustScoreSnapshot, TrustWeights,
};
use crate::infrastructure::event_bus::EventBus;

/// Scores below this are reported as a high-severity trust drop.
const HIGH_SEVERITY_SCORE: f64 = 0.3;

pub struct TrustScoreCalculator {
    agent_repo: Arc<dyn AgentRepository>,
    violation_repo: Arc<dyn ViolationRepository>,
    baseline_repo: Arc<dyn BaselineRepository>,
    signal_repo: Arc<dyn SignalRepository>,
    policy_evaluator: Arc<SecurityPolicyEvaluator>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: TrustConfig,
    weights: TrustWeights,
}

impl TrustScoreCalculator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        violation_repo: Arc<dyn ViolationRepository>,
        baseline_repo: Arc<dyn BaselineRepository>,
        signal_repo: Arc<dyn SignalRepository>,
        policy_evaluator: Arc<SecurityPolicyEvaluator>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: TrustConfig,
    ) -> Self {
        Self {
            agent_repo,
            violation_repo,
            baseline_repo,
            signal_repo,
            policy_evaluator,
            event_bus,
            clock,
            config,
            weights: TrustWeights::default(),
        }
    }

    pub fn weights(&self) -> &TrustWeights {
        &self.weights
    }

    /// Snapshot for an agent that has never been scored: no signals, no
    /// violations, no drift.
    pub fn initial_snapshot(&self, agent: &Agent) -> TrustScoreSnapshot {
        let signals = OperationalSignals::new(agent.id);
        let inputs = TrustInputs {
            status: agent.status,
            is_compromised: agent.is_compromised,
            created_at: agent.created_at,
            signals: &signals,
            recent_violations: &[],
            recent_penalties: 0.0,
            drift_evaluated: 0,
            drift_anomalous: 0,
        };
        self.build_snapshot(agent.id, &inputs)
    }

    fn build_snapshot(&self, agent_id: AgentId, inputs: &TrustInputs<'_>) -> TrustScoreSnapshot {
        let now = self.clock.now();
        let (factors, confidence) = compute_factors(inputs, now);
        TrustScoreSnapshot {
            id: Uuid::new_v4(),
            agent_id,
            factors,
            weights: self.weights,
            score: recalculated_score(inputs, &factors, &self.weights, now),
            confidence,
            source: SnapshotSource::FullRecalculation,
            computed_at: now,
        }
    }

    /// Gather every input for `agent` and compute a full snapshot without storing it.
    pub async fn compute(&self, agent: &Agent) -> Result<TrustScoreSnapshot, EngineError> {
        let since = time_before(self.clock.now(), self.config.lookback_window);
        let signals = self.signal_repo.get(agent.id).await?;
        let violations = self.violation_repo.find_since(agent.id, since).await?;
        let recent: Vec<Severity> = violations.iter().map(|v| v.severity).collect();
        let penalties: f64 = violations.iter().map(|v| v.trust_score_impact).sum();
        let baselines = self.baseline_repo.active_baselines(agent.id).await?;
        let evaluated = baselines.iter().filter(|b| b.deviation_pct.is_some()).count();
        let anomalous = baselines.iter().filter(|b| b.is_anomaly).count();

        let inputs = TrustInputs {
            status: agent.status,
            is_compromised: agent.is_compromised,
            created_at: agent.created_at,
            signals: &signals,
            recent_violations: &recent,
            recent_penalties: penalties,
            drift_evaluated: evaluated,
            drift_anomalous: anomalous,
        };
        Ok(self.build_snapshot(agent.id, &inputs))
    }

    async fn load_agent(&self, agent_id: AgentId) -> Result<Agent, EngineError> {
        self.agent_repo
            .find_by_id(agent_id)
            .await?
            .ok_or(EngineError::UnknownAgent(agent_id))
    }

    /// Full recalculation, stored as a new snapshot.
    pub async fn recalculate(&self, agent_id: AgentId) -> Result<TrustScoreSnapshot, EngineError> {
        let mut attempt = 0;
        loop {
            let agent = self.load_agent(agent_id).await?;
            let snapshot = self.compute(&agent).await?;

            match self.agent_repo.commit_trust_snapshot(&snapshot, agent.version).await {
                Ok(updated) => {
                    self.after_commit(&updated, agent.trust_score, &snapshot).await;
                    return Ok(snapshot);
                }
                Err(RepositoryError::VersionConflict { .. }) if attempt < self.config.max_write_retries => {
                    attempt += 1;
                    debug!(agent_id = %agent_id, attempt, "Trust recalculation lost a version race; retrying");
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    return Err(EngineError::ConcurrentModification(agent_id));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Recalculate within the configured timeout, falling back to the newest
    /// stored snapshot on any failure.
    pub async fn recalculate_or_last_known(&self, agent_id: AgentId) -> Result<TrustScoreSnapshot, EngineError> {
        let outcome = match tokio::time::timeout(self.config.timeout, self.recalculate(agent_id)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.config.timeout)),
        };

        match outcome {
            Ok(snapshot) => Ok(snapshot),
            Err(EngineError::UnknownAgent(id)) => Err(EngineError::UnknownAgent(id)),
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Trust recalculation failed; returning last known score");
                self.agent_repo
                    .latest_snapshot(agent_id)
                    .await?
                    .ok_or_else(|| EngineError::TrustScoreComputationFailure(e.to_string()))
            }
        }
    }

    /// Subtract `delta` from the current score right away. Factors are carried
    /// over from the newest snapshot.
    pub async fn apply_penalty(&self, agent_id: AgentId, delta: f64) -> Result<TrustScoreSnapshot, EngineError> {
        let mut attempt = 0;
        loop {
            let agent = self.load_agent(agent_id).await?;
            let base = match self.agent_repo.latest_snapshot(agent_id).await? {
                Some(snapshot) => snapshot,
                None => self.compute(&agent).await?,
            };
            let snapshot = base.penalized(delta, self.clock.now());

            match self.agent_repo.commit_trust_snapshot(&snapshot, agent.version).await {
                Ok(updated) => {
                    self.after_commit(&updated, agent.trust_score, &snapshot).await;
                    return Ok(snapshot);
                }
                Err(RepositoryError::VersionConflict { .. }) if attempt < self.config.max_write_retries => {
                    attempt += 1;
                    debug!(agent_id = %agent_id, attempt, "Trust penalty lost a version race; retrying");
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    return Err(EngineError::ConcurrentModification(agent_id));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn latest(&self, agent_id: AgentId) -> Result<TrustScoreSnapshot, EngineError> {
        self.agent_repo
            .latest_snapshot(agent_id)
            .await?
            .ok_or(EngineError::UnknownAgent(agent_id))
    }

    pub async fn history(&self, agent_id: AgentId, limit: usize) -> Result<Vec<TrustScoreSnapshot>, EngineError> {
        Ok(self.agent_repo.snapshot_history(agent_id, limit).await?)
    }

    async fn after_commit(&self, agent: &Agent, previous_score: f64, snapshot: &TrustScoreSnapshot) {
        metrics::histogram!("aegis_trust_score", "source" => snapshot.source.as_str()).record(snapshot.score);
        self.event_bus.publish_trust_event(TrustEvent::TrustScoreUpdated {
            agent_id: agent.id,
            previous_score,
            score: snapshot.score,
            source: snapshot.source,
            computed_at: snapshot.computed_at,
        });

        if snapshot.score < self.config.alert_floor && snapshot.score < previous_score {
            info!(
                agent_id = %agent.id,
                previous_score,
                score = snapshot.score,
                floor = self.config.alert_floor,
                "Trust score dropped below alert floor"
            );
            let severity = if snapshot.score < HIGH_SEVERITY_SCORE {
                Severity::High
            } else {
                Severity::Medium
            };
            let event = SecurityEvent {
                organization_id: agent.organization_id,
                agent_id: agent.id,
                agent_type: agent.agent_type.clone(),
                severity,
                kind: SecurityEventKind::TrustScoreDrop {
                    previous_score,
                    score: snapshot.score,
                },
                occurred_at: snapshot.computed_at,
            };
            self.policy_evaluator.evaluate_advisory(&event).await;
        }
    }
}

/// Bounded queue of agents waiting for a full recalculation.
#[derive(Clone)]
pub struct TrustRecalculationQueue {
    sender: mpsc::Sender<AgentId>,
}

impl TrustRecalculationQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AgentId>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue without waiting. Returns `false` when the request was dropped.
    pub fn enqueue(&self, agent_id: AgentId) -> bool {
        match self.sender.try_send(agent_id) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(agent_id = %agent_id, "Trust recalculation queue full; dropping request");
                metrics::counter!("aegis_trust_recalculations_dropped_total").increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(agent_id = %agent_id, "Trust recalculation worker stopped");
                false
            }
        }
    }
}

/// Drain the queue until every sender is gone.
pub fn spawn_recalculation_worker(
    calculator: Arc<TrustScoreCalculator>,
    mut receiver: mpsc::Receiver<AgentId>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Trust recalculation worker started");
        while let Some(agent_id) = receiver.recv().await {
            match calculator.recalculate_or_last_known(agent_id).await {
                Ok(snapshot) => debug!(agent_id = %agent_id, score = snapshot.score, "Trust recalculated"),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "Trust recalculation skipped"),
            }
        }
        info!("Trust recalculation worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentStatus, OrganizationId};
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::repositories::{
        InMemoryAgentRepository, InMemoryBaselineRepository, InMemoryPolicyRepository,
        InMemorySignalRepository, InMemoryViolationRepository,
    };
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        calculator: TrustScoreCalculator,
        agents: InMemoryAgentRepository,
        signals: InMemorySignalRepository,
    }

    fn fixture() -> Fixture {
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
        let calculator = TrustScoreCalculator::new(
            Arc::new(agents.clone()),
            Arc::new(InMemoryViolationRepository::new()),
            Arc::new(InMemoryBaselineRepository::new()),
            Arc::new(signals.clone()),
            evaluator,
            bus,
            clock,
            TrustConfig::default(),
        );
        Fixture {
            calculator,
            agents,
            signals,
        }
    }

    async fn registered(fixture: &Fixture) -> Agent {
        let agent = Agent::new(OrganizationId::new(), "agent", "research", fixture.calculator.clock.now());
        let initial = fixture.calculator.initial_snapshot(&agent);
        fixture.agents.insert(&agent, &initial).await.unwrap()
    }

    #[tokio::test]
    async fn test_new_pending_agent_scores_068() {
        let fixture = fixture();
        let agent = registered(&fixture).await;
        assert!((agent.trust_score - 0.675).abs() < 1e-9);
        let snapshot = fixture.calculator.recalculate(agent.id).await.unwrap();
        assert!((snapshot.score - 0.68).abs() <= 0.01);
    }

    #[tokio::test]
    async fn test_penalty_chain_and_mirror() {
        let fixture = fixture();
        let agent = registered(&fixture).await;

        let mut expected = 0.675;
        for delta in [0.15, 0.20, 0.25] {
            expected -= delta;
            let snapshot = fixture.calculator.apply_penalty(agent.id, delta).await.unwrap();
            assert!((snapshot.score - expected).abs() < 1e-9);
            assert_eq!(snapshot.source, SnapshotSource::ViolationPenalty);

            let stored = fixture.agents.find_by_id(agent.id).await.unwrap().unwrap();
            assert_eq!(stored.trust_score, snapshot.score);
        }

        let floored = fixture.calculator.apply_penalty(agent.id, 0.30).await.unwrap();
        assert_eq!(floored.score, 0.0);
    }

    #[tokio::test]
    async fn test_recalculation_uses_signals() {
        let fixture = fixture();
        let mut agent = registered(&fixture).await;
        agent.transition_to(AgentStatus::Verified, Utc::now()).unwrap();
        fixture.agents.compare_and_swap(&agent, agent.version).await.unwrap();
        fixture.signals.record_action(agent.id, true).await.unwrap();

        let snapshot = fixture.calculator.recalculate(agent.id).await.unwrap();
        assert_eq!(snapshot.factors.verification, 1.0);
        assert_eq!(snapshot.factors.success_rate, 1.0);
        assert!((snapshot.confidence - 4.0 / 8.0).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&snapshot.score));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_masked() {
        let fixture = fixture();
        assert!(matches!(
            fixture.calculator.recalculate_or_last_known(AgentId::new()).await,
            Err(EngineError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_queue_drops_when_full() {
        let (queue, mut receiver) = TrustRecalculationQueue::new(1);
        let agent_id = AgentId::new();
        assert!(queue.enqueue(agent_id));
        assert!(!queue.enqueue(agent_id));
        assert_eq!(receiver.recv().await, Some(agent_id));
    }
}
