// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Drift Detector
//!
//! `update_baseline` only records a sample. Baselines are rebuilt by
//! [`DriftDetector::refresh_baselines`], which the daemon runs on a fixed
//! interval, and `evaluate` compares the newest sample of each metric with the
//! active baseline.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::policy_evaluator::SecurityPolicyEvaluator;
use crate::application::trust_score::TrustRecalculationQueue;
use crate::domain::agent::{Agent, AgentId};
use crate::domain::capability::Severity;
use crate::domain::clock::Clock;
use crate::domain::config::{time_before, DriftConfig};
use crate::domain::drift::{BehavioralBaseline, DriftResult, MetricObservation};
use crate::domain::errors::EngineError;
use crate::domain::events::DriftEvent;
use crate::domain::policy::{SecurityEvent, SecurityEventKind};
use crate::domain::repository::{AgentRepository, BaselineRepository};
use crate::infrastructure::event_bus::EventBus;

pub struct DriftDetector {
    agent_repo: Arc<dyn AgentRepository>,
    baseline_repo: Arc<dyn BaselineRepository>,
    policy_evaluator: Arc<SecurityPolicyEvaluator>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    recalculation: TrustRecalculationQueue,
    config: DriftConfig,
}

impl DriftDetector {
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        baseline_repo: Arc<dyn BaselineRepository>,
        policy_evaluator: Arc<SecurityPolicyEvaluator>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        recalculation: TrustRecalculationQueue,
        config: DriftConfig,
    ) -> Self {
        Self {
            agent_repo,
            baseline_repo,
            policy_evaluator,
            event_bus,
            clock,
            recalculation,
            config,
        }
    }

    async fn load_agent(&self, agent_id: AgentId) -> Result<Agent, EngineError> {
        self.agent_repo
            .find_by_id(agent_id)
            .await?
            .ok_or(EngineError::UnknownAgent(agent_id))
    }

    /// Record one sample of `metric`.
    pub async fn update_baseline(&self, agent_id: AgentId, metric: &str, value: f64) -> Result<MetricObservation, EngineError> {
        let metric = metric.trim();
        if metric.is_empty() {
            return Err(EngineError::InvalidInput("metric name must not be empty".to_string()));
        }
        if !value.is_finite() {
            return Err(EngineError::InvalidInput(format!("metric value for '{metric}' must be finite")));
        }
        self.load_agent(agent_id).await?;

        let observation = MetricObservation {
            agent_id,
            metric: metric.to_string(),
            value,
            observed_at: self.clock.now(),
        };
        self.baseline_repo.record_observation(&observation).await?;
        Ok(observation)
    }

    /// Rebuild every `(agent, metric)` baseline from the rolling window and drop
    /// samples that fell out of it. A metric with too few samples left in the
    /// window loses its active baseline. Returns the number of baselines
    /// established.
    pub async fn refresh_baselines(&self) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let window_start = time_before(now, self.config.window);
        let mut established = 0;
        let mut retired = 0;

        let mut agents: BTreeSet<AgentId> = self.baseline_repo.observed_agents().await?.into_iter().collect();
        agents.extend(self.baseline_repo.baselined_agents().await?);

        for agent_id in agents {
            let observations = self.baseline_repo.observations_since(agent_id, window_start).await?;
            let active: BTreeMap<String, bool> = self
                .baseline_repo
                .active_baselines(agent_id)
                .await?
                .into_iter()
                .map(|b| (b.metric, b.is_anomaly))
                .collect();

            let mut by_metric: BTreeMap<&str, Vec<MetricObservation>> = BTreeMap::new();
            for metric in active.keys() {
                by_metric.entry(metric.as_str()).or_default();
            }
            for observation in &observations {
                by_metric
                    .entry(observation.metric.as_str())
                    .or_default()
                    .push(observation.clone());
            }

            let mut dropped_anomaly = false;
            for (metric, samples) in by_metric {
                let Some(baseline) = BehavioralBaseline::establish(
                    agent_id,
                    metric,
                    &samples,
                    window_start,
                    now,
                    self.config.min_samples,
                ) else {
                    if self.baseline_repo.retire(agent_id, metric).await? {
                        debug!(agent_id = %agent_id, metric, samples = samples.len(), "Baseline retired");
                        retired += 1;
                        dropped_anomaly |= active.get(metric).copied().unwrap_or(false);
                        self.event_bus.publish_drift_event(DriftEvent::BaselineRetired {
                            agent_id,
                            metric: metric.to_string(),
                            retired_at: now,
                        });
                    } else {
                        debug!(agent_id = %agent_id, metric, samples = samples.len(), "Not enough samples for a baseline");
                    }
                    continue;
                };

                self.baseline_repo.supersede(&baseline).await?;
                established += 1;
                self.event_bus.publish_drift_event(DriftEvent::BaselineEstablished {
                    agent_id,
                    metric: baseline.metric.clone(),
                    baseline_value: baseline.baseline_value,
                    sample_count: baseline.sample_count,
                    established_at: now,
                });
            }

            if dropped_anomaly {
                self.recalculation.enqueue(agent_id);
            }
        }

        let pruned = self.baseline_repo.prune_observations(window_start).await?;
        info!(established, retired, pruned, "Behavioral baselines refreshed");
        Ok(established)
    }

    /// Compare the newest sample of each baselined metric against its baseline.
    pub async fn evaluate(&self, agent_id: AgentId) -> Result<Vec<DriftResult>, EngineError> {
        let agent = self.load_agent(agent_id).await?;
        let mut results = Vec::new();

        for mut baseline in self.baseline_repo.active_baselines(agent_id).await? {
            let Some(latest) = self
                .baseline_repo
                .latest_observation(agent_id, &baseline.metric)
                .await?
            else {
                continue;
            };

            let result = baseline.evaluate(latest.value, self.config.threshold);
            self.baseline_repo.save_evaluation(&baseline).await?;
            if result.is_anomaly {
                self.report_anomaly(&agent, &result).await;
            }
            results.push(result);
        }

        if !results.is_empty() {
            self.recalculation.enqueue(agent_id);
        }
        Ok(results)
    }

    async fn report_anomaly(&self, agent: &Agent, result: &DriftResult) {
        let now = self.clock.now();
        warn!(
            agent_id = %agent.id,
            metric = %result.metric,
            baseline = result.baseline_value,
            current = result.current_value,
            deviation_pct = result.deviation_pct,
            "Behavioral drift detected"
        );
        metrics::counter!("aegis_trust_drift_anomalies_total").increment(1);
        self.event_bus.publish_drift_event(DriftEvent::DriftDetected {
            agent_id: agent.id,
            metric: result.metric.clone(),
            deviation_pct: result.deviation_pct,
            detected_at: now,
        });

        let severity = if result.deviation_pct.abs() > 2.0 * self.config.threshold {
            Severity::High
        } else {
            Severity::Medium
        };
        let event = SecurityEvent {
            organization_id: agent.organization_id,
            agent_id: agent.id,
            agent_type: agent.agent_type.clone(),
            severity,
            kind: SecurityEventKind::ConfigurationDrift {
                metric: result.metric.clone(),
                deviation_pct: result.deviation_pct,
            },
            occurred_at: now,
        };
        self.policy_evaluator.evaluate_advisory(&event).await;
    }

    pub async fn baselines(&self, agent_id: AgentId) -> Result<Vec<BehavioralBaseline>, EngineError> {
        self.load_agent(agent_id).await?;
        Ok(self.baseline_repo.active_baselines(agent_id).await?)
    }
}

/// Run [`DriftDetector::refresh_baselines`] every `interval`.
pub fn spawn_baseline_refresher(detector: Arc<DriftDetector>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = detector.refresh_baselines().await {
                warn!(error = %e, "Baseline refresh failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::OrganizationId;
    use crate::domain::clock::ManualClock;
    use crate::domain::trust::{SnapshotSource, TrustFactors, TrustScoreSnapshot, TrustWeights};
    use crate::infrastructure::repositories::{
        InMemoryAgentRepository, InMemoryBaselineRepository, InMemoryPolicyRepository,
    };
    use chrono::Utc;
    use uuid::Uuid;

    struct Fixture {
        detector: DriftDetector,
        agents: InMemoryAgentRepository,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let agents = InMemoryAgentRepository::new();
        let clock = ManualClock::new(Utc::now());
        let bus = Arc::new(EventBus::new(64));
        let evaluator = Arc::new(SecurityPolicyEvaluator::new(
            Arc::new(InMemoryPolicyRepository::new()),
            bus.clone(),
            Arc::new(clock.clone()),
            Duration::from_secs(1),
        ));
        let (queue, _receiver) = TrustRecalculationQueue::new(16);
        let detector = DriftDetector::new(
            Arc::new(agents.clone()),
            Arc::new(InMemoryBaselineRepository::new()),
            evaluator,
            bus,
            Arc::new(clock.clone()),
            queue,
            DriftConfig::default(),
        );
        Fixture { detector, agents, clock }
    }

    async fn agent(fixture: &Fixture) -> AgentId {
        let agent = Agent::new(OrganizationId::new(), "worker", "batch", fixture.clock.now());
        let factors = TrustFactors {
            verification: 0.3,
            uptime: 0.75,
            success_rate: 0.8,
            security: 1.0,
            compliance: 1.0,
            age: 0.3,
            drift: 1.0,
            feedback: 0.75,
        };
        let snapshot = TrustScoreSnapshot {
            id: Uuid::new_v4(),
            agent_id: agent.id,
            factors,
            weights: TrustWeights::default(),
            score: factors.weighted_score(&TrustWeights::default()),
            confidence: 0.25,
            source: SnapshotSource::FullRecalculation,
            computed_at: fixture.clock.now(),
        };
        fixture.agents.insert(&agent, &snapshot).await.unwrap().id
    }

    async fn feed(fixture: &Fixture, agent_id: AgentId, values: &[f64]) {
        for value in values {
            fixture.clock.advance(chrono::Duration::minutes(1));
            fixture
                .detector
                .update_baseline(agent_id, "requests_per_minute", *value)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_update_rejects_bad_input() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        assert!(matches!(
            fixture.detector.update_baseline(agent_id, " ", 1.0).await,
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            fixture.detector.update_baseline(agent_id, "latency", f64::NAN).await,
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            fixture.detector.update_baseline(AgentId::new(), "latency", 1.0).await,
            Err(EngineError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_needs_minimum_samples() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        feed(&fixture, agent_id, &[90.0, 110.0]).await;
        assert_eq!(fixture.detector.refresh_baselines().await.unwrap(), 0);

        feed(&fixture, agent_id, &[100.0]).await;
        assert_eq!(fixture.detector.refresh_baselines().await.unwrap(), 1);
        let baselines = fixture.detector.baselines(agent_id).await.unwrap();
        assert_eq!(baselines.len(), 1);
        assert!((baselines[0].baseline_value - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_refresh_supersedes_previous_baseline() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        feed(&fixture, agent_id, &[10.0, 10.0, 10.0]).await;
        fixture.detector.refresh_baselines().await.unwrap();
        feed(&fixture, agent_id, &[20.0, 20.0, 20.0]).await;
        fixture.detector.refresh_baselines().await.unwrap();

        let baselines = fixture.detector.baselines(agent_id).await.unwrap();
        assert_eq!(baselines.len(), 1);
        assert!((baselines[0].baseline_value - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_evaluate_flags_anomaly() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        feed(&fixture, agent_id, &[90.0, 100.0, 110.0]).await;
        fixture.detector.refresh_baselines().await.unwrap();

        feed(&fixture, agent_id, &[110.0]).await;
        let results = fixture.detector.evaluate(agent_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_anomaly);

        feed(&fixture, agent_id, &[150.0]).await;
        let results = fixture.detector.evaluate(agent_id).await.unwrap();
        assert!(results[0].is_anomaly);
        assert!((results[0].deviation_pct - 0.5).abs() < 1e-9);

        let stored = fixture.detector.baselines(agent_id).await.unwrap();
        assert!(stored[0].is_anomaly);
        assert_eq!(stored[0].current_value, Some(150.0));
    }

    #[tokio::test]
    async fn test_baseline_retired_when_window_runs_dry() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        feed(&fixture, agent_id, &[100.0, 100.0, 100.0]).await;
        fixture.detector.refresh_baselines().await.unwrap();
        feed(&fixture, agent_id, &[200.0]).await;
        assert!(fixture.detector.evaluate(agent_id).await.unwrap()[0].is_anomaly);

        // A single fresh sample is below the minimum, so the old baseline goes.
        fixture.clock.advance(chrono::Duration::days(8));
        feed(&fixture, agent_id, &[100.0]).await;
        assert_eq!(fixture.detector.refresh_baselines().await.unwrap(), 0);
        assert!(fixture.detector.baselines(agent_id).await.unwrap().is_empty());
        assert!(fixture.detector.evaluate(agent_id).await.unwrap().is_empty());

        // With no samples left at all the agent is still visited next time.
        fixture.clock.advance(chrono::Duration::days(8));
        assert_eq!(fixture.detector.refresh_baselines().await.unwrap(), 0);
        assert!(fixture.detector.baselines(agent_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_baseline_retired_after_all_samples_pruned() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        feed(&fixture, agent_id, &[10.0, 12.0, 14.0]).await;
        fixture.detector.refresh_baselines().await.unwrap();
        assert_eq!(fixture.detector.baselines(agent_id).await.unwrap().len(), 1);

        // First refresh past the window prunes every sample.
        fixture.clock.advance(chrono::Duration::days(8));
        fixture.detector.refresh_baselines().await.unwrap();
        assert!(fixture.detector.baselines(agent_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_old_samples_leave_the_window() {
        let fixture = fixture();
        let agent_id = agent(&fixture).await;
        feed(&fixture, agent_id, &[5.0, 5.0, 5.0]).await;
        fixture.clock.advance(chrono::Duration::days(8));
        assert_eq!(fixture.detector.refresh_baselines().await.unwrap(), 0);
        assert!(fixture.detector.evaluate(agent_id).await.unwrap().is_empty());
    }
}
