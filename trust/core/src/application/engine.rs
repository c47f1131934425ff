// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trust Engine
//!
//! Composition root. Builds every service from one [`TrustEngineSpec`] and one
//! set of repositories, sharing a single event bus, clock and recalculation
//! queue between them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::application::agent_registry::AgentRegistry;
use crate::application::attestation_service::{spawn_expiry_sweeper, AttestationVerifier};
use crate::application::bootstrap::BootstrapService;
use crate::application::capability_enforcement::DecisionEngine;
use crate::application::drift_detector::{spawn_baseline_refresher, DriftDetector};
use crate::application::key_lifecycle::KeyLifecycleManager;
use crate::application::policy_evaluator::SecurityPolicyEvaluator;
use crate::application::repository_factory::Repositories;
use crate::application::trust_score::{spawn_recalculation_worker, TrustRecalculationQueue, TrustScoreCalculator};
use crate::domain::agent::AgentId;
use crate::domain::clock::Clock;
use crate::domain::config::TrustEngineSpec;
use crate::infrastructure::audit::TrustAuditLogger;
use crate::infrastructure::crypto::key_vault::{KeyVault, KeyVaultError};
use crate::infrastructure::event_bus::EventBus;

/// Every service of a running engine.
#[derive(Clone)]
pub struct TrustEngine {
    pub registry: Arc<AgentRegistry>,
    pub decisions: Arc<DecisionEngine>,
    pub trust: Arc<TrustScoreCalculator>,
    pub attestations: Arc<AttestationVerifier>,
    pub keys: Arc<KeyLifecycleManager>,
    pub drift: Arc<DriftDetector>,
    pub policies: Arc<SecurityPolicyEvaluator>,
    pub bootstrap: Arc<BootstrapService>,
    pub event_bus: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
    spec: TrustEngineSpec,
}

/// Vault for the configured master key, or a throwaway one when none is set.
pub fn key_vault_from_spec(spec: &TrustEngineSpec) -> Result<KeyVault, KeyVaultError> {
    match spec.keys.master_key.as_deref() {
        Some(master_key) => KeyVault::from_base64(master_key),
        None => {
            warn!("No master key configured; sealed private keys will not survive a restart");
            Ok(KeyVault::ephemeral())
        }
    }
}

impl TrustEngine {
    /// Wire the services. The returned receiver feeds the recalculation
    /// worker; hand it to [`TrustEngine::spawn_background_tasks`] or drop it.
    pub fn new(
        spec: TrustEngineSpec,
        repos: Repositories,
        vault: KeyVault,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<AgentId>) {
        let event_bus = Arc::new(EventBus::with_default_capacity());
        let audit = TrustAuditLogger::new();
        let (queue, receiver) = TrustRecalculationQueue::new(spec.trust.queue_capacity);

        let policies = Arc::new(SecurityPolicyEvaluator::new(
            repos.policies.clone(),
            event_bus.clone(),
            clock.clone(),
            spec.policy.lookup_timeout,
        ));
        let trust = Arc::new(TrustScoreCalculator::new(
            repos.agents.clone(),
            repos.violations.clone(),
            repos.baselines.clone(),
            repos.signals.clone(),
            policies.clone(),
            event_bus.clone(),
            clock.clone(),
            spec.trust.clone(),
        ));
        let registry = Arc::new(AgentRegistry::new(
            repos.agents.clone(),
            repos.signals.clone(),
            trust.clone(),
            queue.clone(),
            event_bus.clone(),
            clock.clone(),
        ));
        let decisions = Arc::new(DecisionEngine::new(
            repos.agents.clone(),
            repos.violations.clone(),
            repos.signals.clone(),
            policies.clone(),
            trust.clone(),
            queue.clone(),
            event_bus.clone(),
            audit.clone(),
            clock.clone(),
        ));
        let attestations = Arc::new(AttestationVerifier::new(
            repos.agents.clone(),
            repos.attestations.clone(),
            policies.clone(),
            event_bus.clone(),
            audit.clone(),
            clock.clone(),
            spec.attestation.validity,
            spec.attestation.freshness_window,
        ));
        let keys = Arc::new(KeyLifecycleManager::new(
            repos.agents.clone(),
            vault,
            event_bus.clone(),
            audit,
            clock.clone(),
            queue.clone(),
            spec.keys.clone(),
            spec.attestation.freshness_window,
        ));
        let drift = Arc::new(DriftDetector::new(
            repos.agents.clone(),
            repos.baselines.clone(),
            policies.clone(),
            event_bus.clone(),
            clock.clone(),
            queue,
            spec.drift.clone(),
        ));
        let bootstrap = Arc::new(BootstrapService::new(
            repos.bootstrap.clone(),
            repos.policies.clone(),
            clock.clone(),
        ));

        let engine = Self {
            registry,
            decisions,
            trust,
            attestations,
            keys,
            drift,
            policies,
            bootstrap,
            event_bus,
            clock,
            spec,
        };
        (engine, receiver)
    }

    pub fn spec(&self) -> &TrustEngineSpec {
        &self.spec
    }

    /// Start the recalculation worker, the baseline refresher and the
    /// attestation expiry sweeper.
    pub fn spawn_background_tasks(&self, receiver: mpsc::Receiver<AgentId>) -> Vec<JoinHandle<()>> {
        vec![
            spawn_recalculation_worker(self.trust.clone(), receiver),
            spawn_baseline_refresher(self.drift.clone(), self.spec.drift.refresh_interval),
            spawn_expiry_sweeper(self.attestations.clone(), self.spec.attestation.sweep_interval),
        ]
    }
}
