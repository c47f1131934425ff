// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits declared in
//! [`crate::domain::repository`].
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! Production implementations backed by PostgreSQL (see [`postgres`]):
//! - **PostgresAgentRepository** - agents, embedded key material, trust history
//! - **PostgresViolationRepository** - append-only capability violations
//! - **PostgresAttestationRepository** - attestations and agent↔server connections
//! - **PostgresBaselineRepository** - metric observations and baselines
//! - **PostgresPolicyRepository** - security policies
//! - **PostgresSignalRepository** - operational counters
//! - **PostgresBootstrapStateRepository** - first-run flag
//!
//! ## In-Memory Repositories
//!
//! Lock-protected maps for tests and single-node deployments. Each store keeps
//! related data behind a single lock so multi-record operations such as
//! `commit_trust_snapshot` are atomic.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::agent::{Agent, AgentId, OrganizationId};
use crate::domain::attestation::{AgentMcpConnection, Attestation, AttestationId, McpServerId};
use crate::domain::capability::CapabilityViolation;
use crate::domain::drift::{BehavioralBaseline, MetricObservation};
use crate::domain::policy::{PolicyId, SecurityPolicy};
use crate::domain::repository::{
    AgentRepository, AttestationRepository, BaselineRepository, BootstrapStateRepository,
    PolicyRepository, RepositoryError, SignalRepository, ViolationRepository,
};
use crate::domain::signals::{OperationalSignals, SignalReport};
use crate::domain::trust::TrustScoreSnapshot;

#[derive(Default)]
struct AgentStore {
    agents: HashMap<AgentId, Agent>,
    snapshots: HashMap<AgentId, Vec<TrustScoreSnapshot>>,
}

#[derive(Clone, Default)]
pub struct InMemoryAgentRepository {
    store: Arc<RwLock<AgentStore>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn version_conflict(id: AgentId, expected: u64) -> RepositoryError {
    RepositoryError::VersionConflict {
        entity: format!("agent {id}"),
        expected,
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn insert(&self, agent: &Agent, initial: &TrustScoreSnapshot) -> Result<Agent, RepositoryError> {
        let mut store = self.store.write();
        if store.agents.contains_key(&agent.id) {
            return Err(RepositoryError::Duplicate(format!("agent {}", agent.id)));
        }

        let mut stored = agent.clone();
        stored.version = 1;
        stored.trust_score = initial.score;
        store.agents.insert(stored.id, stored.clone());
        store.snapshots.insert(stored.id, vec![initial.clone()]);
        Ok(stored)
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.store.read().agents.get(&id).cloned())
    }

    async fn list_by_organization(&self, organization_id: OrganizationId) -> Result<Vec<Agent>, RepositoryError> {
        let store = self.store.read();
        let mut agents: Vec<Agent> = store
            .agents
            .values()
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn compare_and_swap(&self, agent: &Agent, expected_version: u64) -> Result<Agent, RepositoryError> {
        let mut store = self.store.write();
        let stored = store
            .agents
            .get_mut(&agent.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", agent.id)))?;

        if stored.version != expected_version {
            return Err(version_conflict(agent.id, expected_version));
        }

        let trust_score = stored.trust_score;
        *stored = agent.clone();
        stored.trust_score = trust_score;
        stored.version = expected_version + 1;
        Ok(stored.clone())
    }

    async fn commit_trust_snapshot(
        &self,
        snapshot: &TrustScoreSnapshot,
        expected_version: u64,
    ) -> Result<Agent, RepositoryError> {
        let mut guard = self.store.write();
        let store = &mut *guard;
        let stored = store
            .agents
            .get_mut(&snapshot.agent_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", snapshot.agent_id)))?;

        if stored.version != expected_version {
            return Err(version_conflict(snapshot.agent_id, expected_version));
        }

        stored.trust_score = snapshot.score;
        stored.version = expected_version + 1;
        let updated = stored.clone();
        store
            .snapshots
            .entry(snapshot.agent_id)
            .or_default()
            .push(snapshot.clone());
        Ok(updated)
    }

    async fn latest_snapshot(&self, agent_id: AgentId) -> Result<Option<TrustScoreSnapshot>, RepositoryError> {
        let store = self.store.read();
        Ok(store.snapshots.get(&agent_id).and_then(|s| s.last()).cloned())
    }

    async fn snapshot_history(&self, agent_id: AgentId, limit: usize) -> Result<Vec<TrustScoreSnapshot>, RepositoryError> {
        let store = self.store.read();
        Ok(store
            .snapshots
            .get(&agent_id)
            .map(|s| s.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryViolationRepository {
    violations: Arc<RwLock<Vec<CapabilityViolation>>>,
}

impl InMemoryViolationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ViolationRepository for InMemoryViolationRepository {
    async fn append(&self, violation: &CapabilityViolation) -> Result<(), RepositoryError> {
        self.violations.write().push(violation.clone());
        Ok(())
    }

    async fn find_since(&self, agent_id: AgentId, since: DateTime<Utc>) -> Result<Vec<CapabilityViolation>, RepositoryError> {
        Ok(self
            .violations
            .read()
            .iter()
            .filter(|v| v.agent_id == agent_id && v.occurred_at >= since)
            .cloned()
            .collect())
    }

    async fn find_recent(&self, agent_id: AgentId, limit: usize) -> Result<Vec<CapabilityViolation>, RepositoryError> {
        Ok(self
            .violations
            .read()
            .iter()
            .rev()
            .filter(|v| v.agent_id == agent_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct AttestationStore {
    attestations: Vec<Attestation>,
    connections: HashMap<(AgentId, McpServerId), AgentMcpConnection>,
}

#[derive(Clone, Default)]
pub struct InMemoryAttestationRepository {
    store: Arc<RwLock<AttestationStore>>,
}

impl InMemoryAttestationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttestationRepository for InMemoryAttestationRepository {
    async fn append(&self, attestation: &Attestation) -> Result<(), RepositoryError> {
        self.store.write().attestations.push(attestation.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: AttestationId) -> Result<Option<Attestation>, RepositoryError> {
        Ok(self
            .store
            .read()
            .attestations
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn latest_valid_per_agent(
        &self,
        mcp_server_id: McpServerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Attestation>, RepositoryError> {
        let store = self.store.read();
        let mut latest: HashMap<AgentId, &Attestation> = HashMap::new();
        for record in store
            .attestations
            .iter()
            .filter(|a| a.mcp_server_id == mcp_server_id && a.is_valid && a.is_valid_at(now))
        {
            let Some(agent_id) = record.agent_id else {
                continue;
            };
            let newer = latest
                .get(&agent_id)
                .is_none_or(|current| record.verified_at > current.verified_at);
            if newer {
                latest.insert(agent_id, record);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut store = self.store.write();
        let mut expired = 0u64;
        for record in store.attestations.iter_mut() {
            if record.is_valid && record.expires_at.is_some_and(|exp| exp <= now) {
                record.is_valid = false;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn find_connection(
        &self,
        agent_id: AgentId,
        mcp_server_id: McpServerId,
    ) -> Result<Option<AgentMcpConnection>, RepositoryError> {
        Ok(self
            .store
            .read()
            .connections
            .get(&(agent_id, mcp_server_id))
            .cloned())
    }

    async fn save_connection(&self, connection: &AgentMcpConnection) -> Result<(), RepositoryError> {
        self.store
            .write()
            .connections
            .insert((connection.agent_id, connection.mcp_server_id), connection.clone());
        Ok(())
    }
}

#[derive(Default)]
struct BaselineStore {
    observations: Vec<MetricObservation>,
    baselines: Vec<BehavioralBaseline>,
}

#[derive(Clone, Default)]
pub struct InMemoryBaselineRepository {
    store: Arc<RwLock<BaselineStore>>,
}

impl InMemoryBaselineRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineRepository for InMemoryBaselineRepository {
    async fn record_observation(&self, observation: &MetricObservation) -> Result<(), RepositoryError> {
        self.store.write().observations.push(observation.clone());
        Ok(())
    }

    async fn observations_since(
        &self,
        agent_id: AgentId,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricObservation>, RepositoryError> {
        let store = self.store.read();
        let mut found: Vec<MetricObservation> = store
            .observations
            .iter()
            .filter(|o| o.agent_id == agent_id && o.observed_at >= since)
            .cloned()
            .collect();
        found.sort_by_key(|o| o.observed_at);
        Ok(found)
    }

    async fn latest_observation(
        &self,
        agent_id: AgentId,
        metric: &str,
    ) -> Result<Option<MetricObservation>, RepositoryError> {
        let store = self.store.read();
        Ok(store
            .observations
            .iter()
            .filter(|o| o.agent_id == agent_id && o.metric == metric)
            .max_by_key(|o| o.observed_at)
            .cloned())
    }

    async fn prune_observations(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut store = self.store.write();
        let initial = store.observations.len();
        store.observations.retain(|o| o.observed_at >= before);
        Ok((initial - store.observations.len()) as u64)
    }

    async fn observed_agents(&self) -> Result<Vec<AgentId>, RepositoryError> {
        let store = self.store.read();
        let mut agents: Vec<AgentId> = store.observations.iter().map(|o| o.agent_id).collect();
        agents.sort();
        agents.dedup();
        Ok(agents)
    }

    async fn active_baselines(&self, agent_id: AgentId) -> Result<Vec<BehavioralBaseline>, RepositoryError> {
        Ok(self
            .store
            .read()
            .baselines
            .iter()
            .filter(|b| b.agent_id == agent_id && b.is_active)
            .cloned()
            .collect())
    }

    async fn supersede(&self, baseline: &BehavioralBaseline) -> Result<(), RepositoryError> {
        let mut store = self.store.write();
        for existing in store
            .baselines
            .iter_mut()
            .filter(|b| b.agent_id == baseline.agent_id && b.metric == baseline.metric && b.is_active)
        {
            existing.is_active = false;
        }
        store.baselines.push(baseline.clone());
        Ok(())
    }

    async fn baselined_agents(&self) -> Result<Vec<AgentId>, RepositoryError> {
        let store = self.store.read();
        let mut agents: Vec<AgentId> = store
            .baselines
            .iter()
            .filter(|b| b.is_active)
            .map(|b| b.agent_id)
            .collect();
        agents.sort();
        agents.dedup();
        Ok(agents)
    }

    async fn retire(&self, agent_id: AgentId, metric: &str) -> Result<bool, RepositoryError> {
        let mut store = self.store.write();
        let mut retired = false;
        for existing in store
            .baselines
            .iter_mut()
            .filter(|b| b.agent_id == agent_id && b.metric == metric && b.is_active)
        {
            existing.is_active = false;
            retired = true;
        }
        Ok(retired)
    }

    async fn save_evaluation(&self, baseline: &BehavioralBaseline) -> Result<(), RepositoryError> {
        let mut store = self.store.write();
        let existing = store
            .baselines
            .iter_mut()
            .find(|b| b.id == baseline.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("baseline {}", baseline.id)))?;
        existing.current_value = baseline.current_value;
        existing.deviation_pct = baseline.deviation_pct;
        existing.is_anomaly = baseline.is_anomaly;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPolicyRepository {
    policies: Arc<RwLock<HashMap<PolicyId, SecurityPolicy>>>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn save(&self, policy: &SecurityPolicy) -> Result<(), RepositoryError> {
        self.policies.write().insert(policy.id, policy.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PolicyId) -> Result<Option<SecurityPolicy>, RepositoryError> {
        Ok(self.policies.read().get(&id).cloned())
    }

    async fn list_by_organization(&self, organization_id: OrganizationId) -> Result<Vec<SecurityPolicy>, RepositoryError> {
        Ok(self
            .policies
            .read()
            .values()
            .filter(|p| p.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySignalRepository {
    signals: Arc<RwLock<HashMap<AgentId, OperationalSignals>>>,
}

impl InMemorySignalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalRepository for InMemorySignalRepository {
    async fn get(&self, agent_id: AgentId) -> Result<OperationalSignals, RepositoryError> {
        Ok(self
            .signals
            .read()
            .get(&agent_id)
            .cloned()
            .unwrap_or_else(|| OperationalSignals::new(agent_id)))
    }

    async fn record_action(&self, agent_id: AgentId, allowed: bool) -> Result<(), RepositoryError> {
        let mut signals = self.signals.write();
        let entry = signals
            .entry(agent_id)
            .or_insert_with(|| OperationalSignals::new(agent_id));
        if allowed {
            entry.actions_allowed += 1;
        } else {
            entry.actions_denied += 1;
        }
        Ok(())
    }

    async fn merge_report(
        &self,
        agent_id: AgentId,
        report: &SignalReport,
        now: DateTime<Utc>,
    ) -> Result<OperationalSignals, RepositoryError> {
        let mut signals = self.signals.write();
        let entry = signals
            .entry(agent_id)
            .or_insert_with(|| OperationalSignals::new(agent_id));
        report.merge_into(entry, now);
        Ok(entry.clone())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBootstrapStateRepository {
    completed_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl InMemoryBootstrapStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BootstrapStateRepository for InMemoryBootstrapStateRepository {
    async fn is_bootstrapped(&self) -> Result<bool, RepositoryError> {
        Ok(self.completed_at.read().is_some())
    }

    async fn mark_bootstrapped(&self, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut completed = self.completed_at.write();
        if completed.is_some() {
            return Ok(false);
        }
        *completed = Some(at);
        Ok(true)
    }
}
