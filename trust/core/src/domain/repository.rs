// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Repository Pattern - Domain Interfaces
//
// Storage-agnostic traits for the trust engine aggregates. The in-memory
// implementations back tests and single-node deployments; the PostgreSQL
// implementations back production.
//
// Agent writes are guarded by `Agent.version`: every mutating call carries the
// version the caller read, and the store rejects the write with
// `RepositoryError::VersionConflict` if someone else got there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::agent::{Agent, AgentId, OrganizationId};
use crate::domain::attestation::{AgentMcpConnection, Attestation, AttestationId, McpServerId};
use crate::domain::capability::CapabilityViolation;
use crate::domain::drift::{BehavioralBaseline, MetricObservation};
use crate::domain::policy::{PolicyId, SecurityPolicy};
use crate::domain::signals::{OperationalSignals, SignalReport};
use crate::domain::trust::TrustScoreSnapshot;

/// Repository interface for the Agent aggregate and its trust history
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Insert a new agent together with its first trust snapshot.
    /// Returns the stored agent (version 1, mirror set from the snapshot).
    async fn insert(&self, agent: &Agent, initial: &TrustScoreSnapshot) -> Result<Agent, RepositoryError>;

    /// Find agent by ID. Returns a complete clone of the aggregate.
    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;

    /// List agents owned by an organization
    async fn list_by_organization(&self, organization_id: OrganizationId) -> Result<Vec<Agent>, RepositoryError>;

    /// Replace the stored agent if its version still equals `expected_version`.
    /// `trust_score` is not written by this call.
    async fn compare_and_swap(&self, agent: &Agent, expected_version: u64) -> Result<Agent, RepositoryError>;

    /// Append `snapshot` and overwrite the trust mirror in one step, guarded by
    /// `expected_version`.
    async fn commit_trust_snapshot(
        &self,
        snapshot: &TrustScoreSnapshot,
        expected_version: u64,
    ) -> Result<Agent, RepositoryError>;

    /// Newest snapshot for an agent
    async fn latest_snapshot(&self, agent_id: AgentId) -> Result<Option<TrustScoreSnapshot>, RepositoryError>;

    /// Snapshots newest first, at most `limit`
    async fn snapshot_history(&self, agent_id: AgentId, limit: usize) -> Result<Vec<TrustScoreSnapshot>, RepositoryError>;
}

/// Append-only capability violation log
#[async_trait]
pub trait ViolationRepository: Send + Sync {
    async fn append(&self, violation: &CapabilityViolation) -> Result<(), RepositoryError>;

    /// Violations for an agent that occurred at or after `since`
    async fn find_since(&self, agent_id: AgentId, since: DateTime<Utc>) -> Result<Vec<CapabilityViolation>, RepositoryError>;

    /// Most recent violations for an agent, newest first
    async fn find_recent(&self, agent_id: AgentId, limit: usize) -> Result<Vec<CapabilityViolation>, RepositoryError>;
}

/// Append-only attestation log plus agent↔server connection records
#[async_trait]
pub trait AttestationRepository: Send + Sync {
    async fn append(&self, attestation: &Attestation) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: AttestationId) -> Result<Option<Attestation>, RepositoryError>;

    /// Newest verified, unexpired attestation of each distinct agent for a server
    async fn latest_valid_per_agent(
        &self,
        mcp_server_id: McpServerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Attestation>, RepositoryError>;

    /// Flip `is_valid` to false on every record whose `expires_at` has passed.
    /// Returns the number of records changed.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;

    async fn find_connection(
        &self,
        agent_id: AgentId,
        mcp_server_id: McpServerId,
    ) -> Result<Option<AgentMcpConnection>, RepositoryError>;

    async fn save_connection(&self, connection: &AgentMcpConnection) -> Result<(), RepositoryError>;
}

/// Raw metric samples and the baselines derived from them
#[async_trait]
pub trait BaselineRepository: Send + Sync {
    async fn record_observation(&self, observation: &MetricObservation) -> Result<(), RepositoryError>;

    /// Observations for an agent at or after `since`, oldest first
    async fn observations_since(
        &self,
        agent_id: AgentId,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricObservation>, RepositoryError>;

    /// Newest observation for `(agent, metric)`
    async fn latest_observation(
        &self,
        agent_id: AgentId,
        metric: &str,
    ) -> Result<Option<MetricObservation>, RepositoryError>;

    /// Drop observations older than `before`. Returns the number removed.
    async fn prune_observations(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError>;

    /// Agents that have at least one observation
    async fn observed_agents(&self) -> Result<Vec<AgentId>, RepositoryError>;

    async fn active_baselines(&self, agent_id: AgentId) -> Result<Vec<BehavioralBaseline>, RepositoryError>;

    /// Agents that have at least one active baseline
    async fn baselined_agents(&self) -> Result<Vec<AgentId>, RepositoryError>;

    /// Deactivate the current active baseline for the same `(agent, metric)` and
    /// store `baseline` as the new active one.
    async fn supersede(&self, baseline: &BehavioralBaseline) -> Result<(), RepositoryError>;

    /// Deactivate the active baseline for `(agent, metric)` without a replacement.
    /// Returns `false` when there was none.
    async fn retire(&self, agent_id: AgentId, metric: &str) -> Result<bool, RepositoryError>;

    /// Persist evaluation results on an existing baseline
    async fn save_evaluation(&self, baseline: &BehavioralBaseline) -> Result<(), RepositoryError>;
}

/// Repository interface for security policies
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn save(&self, policy: &SecurityPolicy) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: PolicyId) -> Result<Option<SecurityPolicy>, RepositoryError>;

    async fn list_by_organization(&self, organization_id: OrganizationId) -> Result<Vec<SecurityPolicy>, RepositoryError>;
}

/// Per-agent operational counters
#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn get(&self, agent_id: AgentId) -> Result<OperationalSignals, RepositoryError>;

    async fn record_action(&self, agent_id: AgentId, allowed: bool) -> Result<(), RepositoryError>;

    /// Merge an already validated report
    async fn merge_report(
        &self,
        agent_id: AgentId,
        report: &SignalReport,
        now: DateTime<Utc>,
    ) -> Result<OperationalSignals, RepositoryError>;
}

/// One-time initialization flag
#[async_trait]
pub trait BootstrapStateRepository: Send + Sync {
    async fn is_bootstrapped(&self) -> Result<bool, RepositoryError>;

    /// Set the flag. Returns `false` if it was already set.
    async fn mark_bootstrapped(&self, at: DateTime<Utc>) -> Result<bool, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    Duplicate(String),

    #[error("Version conflict on {entity}: expected version {expected}")]
    VersionConflict { entity: String, expected: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
