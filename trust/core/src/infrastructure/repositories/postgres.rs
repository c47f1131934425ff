// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Repositories
//!
//! Production implementations of the trust engine repository traits, backed by
//! the schema in `migrations/0001_init.sql`.
//!
//! Agent writes use a version-guarded `UPDATE ... WHERE version = $n`. A miss
//! is reported as `VersionConflict` when the row still exists and `NotFound`
//! otherwise. `commit_trust_snapshot` appends the snapshot and moves the
//! `agents.trust_score` mirror inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::agent::{Agent, AgentId, AgentStatus, OrganizationId};
use crate::domain::attestation::{AgentMcpConnection, Attestation, AttestationId, McpServerId};
use crate::domain::capability::{CapabilityGrant, CapabilityViolation, Severity, ViolationId};
use crate::domain::drift::{BehavioralBaseline, MetricObservation};
use crate::domain::keys::{KeyMaterial, KeySlot};
use crate::domain::policy::{EnforcementAction, PolicyId, PolicyRule, PolicyScope, SecurityPolicy};
use crate::domain::repository::{
    AgentRepository, AttestationRepository, BaselineRepository, BootstrapStateRepository,
    PolicyRepository, RepositoryError, SignalRepository, ViolationRepository,
};
use crate::domain::signals::{OperationalSignals, SignalReport};
use crate::domain::trust::{SnapshotSource, TrustFactors, TrustScoreSnapshot, TrustWeights};

const AGENT_COLUMNS: &str = "id, organization_id, name, agent_type, status, capabilities, trust_score, \
                             key_material, is_compromised, version, created_at, updated_at";

const SNAPSHOT_COLUMNS: &str = "id, agent_id, factors, weights, score, confidence, source, computed_at";

const VIOLATION_COLUMNS: &str = "id, agent_id, attempted_capability, resource, registered_capabilities, \
                                 severity, trust_score_impact, blocked, source_context, matched_policy_id, \
                                 occurred_at";

const ATTESTATION_COLUMNS: &str = "id, mcp_server_id, agent_id, payload, signature, verified, failure_reason, \
                                   verified_at, expires_at, is_valid, confidence_contribution, key_slot, \
                                   recorded_at";

const BASELINE_COLUMNS: &str = "id, agent_id, metric, baseline_value, current_value, deviation_pct, is_anomaly, \
                                window_start, window_end, sample_count, is_active, established_at";

const POLICY_COLUMNS: &str = "id, organization_id, name, rule, enforcement_action, severity_threshold, scope, \
                              priority, enabled, created_at";

const SIGNAL_COLUMNS: &str = "agent_id, actions_allowed, actions_denied, uptime_ratio, compliance_score, \
                              feedback_sum, feedback_count, updated_at";

fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn unknown_value(column: &str, value: &str) -> RepositoryError {
    RepositoryError::Serialization(format!("Unknown {column} value '{value}'"))
}

fn map_write_error(err: sqlx::Error, entity: String) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Duplicate(entity),
        _ => RepositoryError::Database(err.to_string()),
    }
}

fn row_to_agent(row: &PgRow) -> Result<Agent, RepositoryError> {
    let status: String = row.try_get("status")?;
    let capabilities: serde_json::Value = row.try_get("capabilities")?;
    let key_material: Option<serde_json::Value> = row.try_get("key_material")?;
    let version: i64 = row.try_get("version")?;

    Ok(Agent {
        id: AgentId(row.try_get("id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        name: row.try_get("name")?,
        agent_type: row.try_get("agent_type")?,
        status: AgentStatus::parse(&status).ok_or_else(|| unknown_value("status", &status))?,
        capabilities: serde_json::from_value::<Vec<CapabilityGrant>>(capabilities)?,
        trust_score: row.try_get("trust_score")?,
        key_material: key_material
            .map(serde_json::from_value::<KeyMaterial>)
            .transpose()?,
        is_compromised: row.try_get("is_compromised")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: from_db_count(version),
    })
}

fn row_to_snapshot(row: &PgRow) -> Result<TrustScoreSnapshot, RepositoryError> {
    let factors: serde_json::Value = row.try_get("factors")?;
    let weights: serde_json::Value = row.try_get("weights")?;
    let source: String = row.try_get("source")?;

    Ok(TrustScoreSnapshot {
        id: row.try_get("id")?,
        agent_id: AgentId(row.try_get("agent_id")?),
        factors: serde_json::from_value::<TrustFactors>(factors)?,
        weights: serde_json::from_value::<TrustWeights>(weights)?,
        score: row.try_get("score")?,
        confidence: row.try_get("confidence")?,
        source: SnapshotSource::parse(&source).ok_or_else(|| unknown_value("source", &source))?,
        computed_at: row.try_get("computed_at")?,
    })
}

async fn insert_snapshot<'e, E>(executor: E, snapshot: &TrustScoreSnapshot) -> Result<(), RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO trust_score_snapshots (
            id, agent_id, factors, weights, score, confidence, source, computed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(snapshot.id)
    .bind(snapshot.agent_id.0)
    .bind(serde_json::to_value(snapshot.factors)?)
    .bind(serde_json::to_value(snapshot.weights)?)
    .bind(snapshot.score)
    .bind(snapshot.confidence)
    .bind(snapshot.source.as_str())
    .bind(snapshot.computed_at)
    .execute(executor)
    .await
    .map_err(|e| RepositoryError::Database(format!("Failed to append trust snapshot: {e}")))?;
    Ok(())
}

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish a stale version from a missing row after a guarded update hit nothing.
    async fn miss_reason(&self, id: AgentId, expected_version: u64) -> RepositoryError {
        let exists = sqlx::query("SELECT 1 FROM agents WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await;
        match exists {
            Ok(Some(_)) => RepositoryError::VersionConflict {
                entity: format!("agent {id}"),
                expected: expected_version,
            },
            Ok(None) => RepositoryError::NotFound(format!("agent {id}")),
            Err(e) => RepositoryError::Database(e.to_string()),
        }
    }
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn insert(&self, agent: &Agent, initial: &TrustScoreSnapshot) -> Result<Agent, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO agents (
                id, organization_id, name, agent_type, status, capabilities, trust_score,
                key_material, is_compromised, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 1, $10, $11)
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(agent.id.0)
        .bind(agent.organization_id.0)
        .bind(&agent.name)
        .bind(&agent.agent_type)
        .bind(agent.status.as_str())
        .bind(serde_json::to_value(&agent.capabilities)?)
        .bind(initial.score)
        .bind(agent.key_material.as_ref().map(serde_json::to_value).transpose()?)
        .bind(agent.is_compromised)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, format!("agent {}", agent.id)))?;

        insert_snapshot(&mut *tx, initial).await?;
        tx.commit().await?;

        row_to_agent(&row)
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn list_by_organization(&self, organization_id: OrganizationId) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE organization_id = $1 ORDER BY created_at"
        ))
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(row_to_agent).collect()
    }

    async fn compare_and_swap(&self, agent: &Agent, expected_version: u64) -> Result<Agent, RepositoryError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE agents SET
                name = $3,
                agent_type = $4,
                status = $5,
                capabilities = $6,
                key_material = $7,
                is_compromised = $8,
                updated_at = $9,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(agent.id.0)
        .bind(to_db_count(expected_version))
        .bind(&agent.name)
        .bind(&agent.agent_type)
        .bind(agent.status.as_str())
        .bind(serde_json::to_value(&agent.capabilities)?)
        .bind(agent.key_material.as_ref().map(serde_json::to_value).transpose()?)
        .bind(agent.is_compromised)
        .bind(agent.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update agent: {e}")))?;

        match row {
            Some(row) => row_to_agent(&row),
            None => Err(self.miss_reason(agent.id, expected_version).await),
        }
    }

    async fn commit_trust_snapshot(
        &self,
        snapshot: &TrustScoreSnapshot,
        expected_version: u64,
    ) -> Result<Agent, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE agents SET trust_score = $3, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {AGENT_COLUMNS}
            "#
        ))
        .bind(snapshot.agent_id.0)
        .bind(to_db_count(expected_version))
        .bind(snapshot.score)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update trust mirror: {e}")))?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(self.miss_reason(snapshot.agent_id, expected_version).await);
        };

        insert_snapshot(&mut *tx, snapshot).await?;
        tx.commit().await?;

        row_to_agent(&row)
    }

    async fn latest_snapshot(&self, agent_id: AgentId) -> Result<Option<TrustScoreSnapshot>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM trust_score_snapshots WHERE agent_id = $1 ORDER BY seq DESC LIMIT 1"
        ))
        .bind(agent_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_snapshot).transpose()
    }

    async fn snapshot_history(&self, agent_id: AgentId, limit: usize) -> Result<Vec<TrustScoreSnapshot>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM trust_score_snapshots WHERE agent_id = $1 ORDER BY seq DESC LIMIT $2"
        ))
        .bind(agent_id.0)
        .bind(to_db_count(limit as u64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_snapshot).collect()
    }
}

fn row_to_violation(row: &PgRow) -> Result<CapabilityViolation, RepositoryError> {
    let registered: serde_json::Value = row.try_get("registered_capabilities")?;
    let severity: String = row.try_get("severity")?;
    let matched_policy_id: Option<Uuid> = row.try_get("matched_policy_id")?;

    Ok(CapabilityViolation {
        id: ViolationId(row.try_get("id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        attempted_capability: row.try_get("attempted_capability")?,
        resource: row.try_get("resource")?,
        registered_capabilities: serde_json::from_value::<BTreeSet<String>>(registered)?,
        severity: Severity::parse(&severity).ok_or_else(|| unknown_value("severity", &severity))?,
        trust_score_impact: row.try_get("trust_score_impact")?,
        blocked: row.try_get("blocked")?,
        source_context: row.try_get("source_context")?,
        matched_policy_id: matched_policy_id.map(PolicyId),
        occurred_at: row.try_get("occurred_at")?,
    })
}

pub struct PostgresViolationRepository {
    pool: PgPool,
}

impl PostgresViolationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ViolationRepository for PostgresViolationRepository {
    async fn append(&self, violation: &CapabilityViolation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO capability_violations (
                id, agent_id, attempted_capability, resource, registered_capabilities, severity,
                trust_score_impact, blocked, source_context, matched_policy_id, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(violation.id.0)
        .bind(violation.agent_id.0)
        .bind(&violation.attempted_capability)
        .bind(&violation.resource)
        .bind(serde_json::to_value(&violation.registered_capabilities)?)
        .bind(violation.severity.as_str())
        .bind(violation.trust_score_impact)
        .bind(violation.blocked)
        .bind(&violation.source_context)
        .bind(violation.matched_policy_id.map(|p| p.0))
        .bind(violation.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, format!("violation {}", violation.id)))?;
        Ok(())
    }

    async fn find_since(&self, agent_id: AgentId, since: DateTime<Utc>) -> Result<Vec<CapabilityViolation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM capability_violations \
             WHERE agent_id = $1 AND occurred_at >= $2 ORDER BY occurred_at"
        ))
        .bind(agent_id.0)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_violation).collect()
    }

    async fn find_recent(&self, agent_id: AgentId, limit: usize) -> Result<Vec<CapabilityViolation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM capability_violations \
             WHERE agent_id = $1 ORDER BY occurred_at DESC LIMIT $2"
        ))
        .bind(agent_id.0)
        .bind(to_db_count(limit as u64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_violation).collect()
    }
}

fn row_to_attestation(row: &PgRow) -> Result<Attestation, RepositoryError> {
    let agent_id: Option<Uuid> = row.try_get("agent_id")?;
    let key_slot: Option<String> = row.try_get("key_slot")?;
    let key_slot = match key_slot {
        Some(slot) => Some(KeySlot::parse(&slot).ok_or_else(|| unknown_value("key_slot", &slot))?),
        None => None,
    };

    Ok(Attestation {
        id: AttestationId(row.try_get("id")?),
        mcp_server_id: McpServerId(row.try_get("mcp_server_id")?),
        agent_id: agent_id.map(AgentId),
        payload: row.try_get("payload")?,
        signature: row.try_get("signature")?,
        verified: row.try_get("verified")?,
        failure_reason: row.try_get("failure_reason")?,
        verified_at: row.try_get("verified_at")?,
        expires_at: row.try_get("expires_at")?,
        is_valid: row.try_get("is_valid")?,
        confidence_contribution: row.try_get("confidence_contribution")?,
        key_slot,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn row_to_connection(row: &PgRow) -> Result<AgentMcpConnection, RepositoryError> {
    let count: i64 = row.try_get("attestation_count")?;
    let latency: i64 = row.try_get("last_latency_ms")?;
    Ok(AgentMcpConnection {
        agent_id: AgentId(row.try_get("agent_id")?),
        mcp_server_id: McpServerId(row.try_get("mcp_server_id")?),
        first_attested_at: row.try_get("first_attested_at")?,
        last_attested_at: row.try_get("last_attested_at")?,
        attestation_count: from_db_count(count),
        last_latency_ms: from_db_count(latency),
    })
}

pub struct PostgresAttestationRepository {
    pool: PgPool,
}

impl PostgresAttestationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttestationRepository for PostgresAttestationRepository {
    async fn append(&self, attestation: &Attestation) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO attestations (
                id, mcp_server_id, agent_id, payload, signature, verified, failure_reason,
                verified_at, expires_at, is_valid, confidence_contribution, key_slot, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(attestation.id.0)
        .bind(attestation.mcp_server_id.0)
        .bind(attestation.agent_id.map(|a| a.0))
        .bind(&attestation.payload)
        .bind(&attestation.signature)
        .bind(attestation.verified)
        .bind(&attestation.failure_reason)
        .bind(attestation.verified_at)
        .bind(attestation.expires_at)
        .bind(attestation.is_valid)
        .bind(attestation.confidence_contribution)
        .bind(attestation.key_slot.map(|s| s.as_str()))
        .bind(attestation.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, format!("attestation {}", attestation.id)))?;
        Ok(())
    }

    async fn find_by_id(&self, id: AttestationId) -> Result<Option<Attestation>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ATTESTATION_COLUMNS} FROM attestations WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_attestation).transpose()
    }

    async fn latest_valid_per_agent(
        &self,
        mcp_server_id: McpServerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Attestation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT DISTINCT ON (agent_id) {ATTESTATION_COLUMNS}
            FROM attestations
            WHERE mcp_server_id = $1
              AND agent_id IS NOT NULL
              AND verified
              AND is_valid
              AND expires_at > $2
            ORDER BY agent_id, verified_at DESC
            "#
        ))
        .bind(mcp_server_id.0)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_attestation).collect()
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("UPDATE attestations SET is_valid = FALSE WHERE is_valid AND expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find_connection(
        &self,
        agent_id: AgentId,
        mcp_server_id: McpServerId,
    ) -> Result<Option<AgentMcpConnection>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT agent_id, mcp_server_id, first_attested_at, last_attested_at,
                   attestation_count, last_latency_ms
            FROM agent_mcp_connections
            WHERE agent_id = $1 AND mcp_server_id = $2
            "#,
        )
        .bind(agent_id.0)
        .bind(mcp_server_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_connection).transpose()
    }

    async fn save_connection(&self, connection: &AgentMcpConnection) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO agent_mcp_connections (
                agent_id, mcp_server_id, first_attested_at, last_attested_at,
                attestation_count, last_latency_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (agent_id, mcp_server_id) DO UPDATE SET
                last_attested_at = EXCLUDED.last_attested_at,
                attestation_count = EXCLUDED.attestation_count,
                last_latency_ms = EXCLUDED.last_latency_ms
            "#,
        )
        .bind(connection.agent_id.0)
        .bind(connection.mcp_server_id.0)
        .bind(connection.first_attested_at)
        .bind(connection.last_attested_at)
        .bind(to_db_count(connection.attestation_count))
        .bind(to_db_count(connection.last_latency_ms))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_observation(row: &PgRow) -> Result<MetricObservation, RepositoryError> {
    Ok(MetricObservation {
        agent_id: AgentId(row.try_get("agent_id")?),
        metric: row.try_get("metric")?,
        value: row.try_get("value")?,
        observed_at: row.try_get("observed_at")?,
    })
}

fn row_to_baseline(row: &PgRow) -> Result<BehavioralBaseline, RepositoryError> {
    let sample_count: i64 = row.try_get("sample_count")?;
    Ok(BehavioralBaseline {
        id: row.try_get("id")?,
        agent_id: AgentId(row.try_get("agent_id")?),
        metric: row.try_get("metric")?,
        baseline_value: row.try_get("baseline_value")?,
        current_value: row.try_get("current_value")?,
        deviation_pct: row.try_get("deviation_pct")?,
        is_anomaly: row.try_get("is_anomaly")?,
        window_start: row.try_get("window_start")?,
        window_end: row.try_get("window_end")?,
        sample_count: usize::try_from(sample_count).unwrap_or(0),
        is_active: row.try_get("is_active")?,
        established_at: row.try_get("established_at")?,
    })
}

pub struct PostgresBaselineRepository {
    pool: PgPool,
}

impl PostgresBaselineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaselineRepository for PostgresBaselineRepository {
    async fn record_observation(&self, observation: &MetricObservation) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO metric_observations (agent_id, metric, value, observed_at) VALUES ($1, $2, $3, $4)")
            .bind(observation.agent_id.0)
            .bind(&observation.metric)
            .bind(observation.value)
            .bind(observation.observed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn observations_since(
        &self,
        agent_id: AgentId,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricObservation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT agent_id, metric, value, observed_at FROM metric_observations \
             WHERE agent_id = $1 AND observed_at >= $2 ORDER BY observed_at",
        )
        .bind(agent_id.0)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_observation).collect()
    }

    async fn latest_observation(
        &self,
        agent_id: AgentId,
        metric: &str,
    ) -> Result<Option<MetricObservation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT agent_id, metric, value, observed_at FROM metric_observations \
             WHERE agent_id = $1 AND metric = $2 ORDER BY observed_at DESC LIMIT 1",
        )
        .bind(agent_id.0)
        .bind(metric)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_observation).transpose()
    }

    async fn prune_observations(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM metric_observations WHERE observed_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn observed_agents(&self) -> Result<Vec<AgentId>, RepositoryError> {
        let rows = sqlx::query("SELECT DISTINCT agent_id FROM metric_observations ORDER BY agent_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<AgentId, RepositoryError> { Ok(AgentId(row.try_get("agent_id")?)) })
            .collect()
    }

    async fn active_baselines(&self, agent_id: AgentId) -> Result<Vec<BehavioralBaseline>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {BASELINE_COLUMNS} FROM behavioral_baselines WHERE agent_id = $1 AND is_active ORDER BY metric"
        ))
        .bind(agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_baseline).collect()
    }

    async fn supersede(&self, baseline: &BehavioralBaseline) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE behavioral_baselines SET is_active = FALSE WHERE agent_id = $1 AND metric = $2 AND is_active")
            .bind(baseline.agent_id.0)
            .bind(&baseline.metric)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO behavioral_baselines (
                id, agent_id, metric, baseline_value, current_value, deviation_pct, is_anomaly,
                window_start, window_end, sample_count, is_active, established_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(baseline.id)
        .bind(baseline.agent_id.0)
        .bind(&baseline.metric)
        .bind(baseline.baseline_value)
        .bind(baseline.current_value)
        .bind(baseline.deviation_pct)
        .bind(baseline.is_anomaly)
        .bind(baseline.window_start)
        .bind(baseline.window_end)
        .bind(to_db_count(baseline.sample_count as u64))
        .bind(baseline.is_active)
        .bind(baseline.established_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, format!("baseline {}", baseline.id)))?;

        tx.commit().await?;
        Ok(())
    }

    async fn baselined_agents(&self) -> Result<Vec<AgentId>, RepositoryError> {
        let rows = sqlx::query("SELECT DISTINCT agent_id FROM behavioral_baselines WHERE is_active ORDER BY agent_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<AgentId, RepositoryError> { Ok(AgentId(row.try_get("agent_id")?)) })
            .collect()
    }

    async fn retire(&self, agent_id: AgentId, metric: &str) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("UPDATE behavioral_baselines SET is_active = FALSE WHERE agent_id = $1 AND metric = $2 AND is_active")
                .bind(agent_id.0)
                .bind(metric)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_evaluation(&self, baseline: &BehavioralBaseline) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE behavioral_baselines SET current_value = $2, deviation_pct = $3, is_anomaly = $4 WHERE id = $1",
        )
        .bind(baseline.id)
        .bind(baseline.current_value)
        .bind(baseline.deviation_pct)
        .bind(baseline.is_anomaly)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("baseline {}", baseline.id)));
        }
        Ok(())
    }
}

fn row_to_policy(row: &PgRow) -> Result<SecurityPolicy, RepositoryError> {
    let rule: serde_json::Value = row.try_get("rule")?;
    let scope: serde_json::Value = row.try_get("scope")?;
    let action: String = row.try_get("enforcement_action")?;
    let threshold: String = row.try_get("severity_threshold")?;

    Ok(SecurityPolicy {
        id: PolicyId(row.try_get("id")?),
        organization_id: OrganizationId(row.try_get("organization_id")?),
        name: row.try_get("name")?,
        rule: serde_json::from_value::<PolicyRule>(rule)?,
        enforcement_action: EnforcementAction::parse(&action)
            .ok_or_else(|| unknown_value("enforcement_action", &action))?,
        severity_threshold: Severity::parse(&threshold)
            .ok_or_else(|| unknown_value("severity_threshold", &threshold))?,
        scope: serde_json::from_value::<PolicyScope>(scope)?,
        priority: row.try_get("priority")?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct PostgresPolicyRepository {
    pool: PgPool,
}

impl PostgresPolicyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyRepository for PostgresPolicyRepository {
    async fn save(&self, policy: &SecurityPolicy) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO security_policies (
                id, organization_id, name, rule, enforcement_action, severity_threshold,
                scope, priority, enabled, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                rule = EXCLUDED.rule,
                enforcement_action = EXCLUDED.enforcement_action,
                severity_threshold = EXCLUDED.severity_threshold,
                scope = EXCLUDED.scope,
                priority = EXCLUDED.priority,
                enabled = EXCLUDED.enabled
            "#,
        )
        .bind(policy.id.0)
        .bind(policy.organization_id.0)
        .bind(&policy.name)
        .bind(serde_json::to_value(&policy.rule)?)
        .bind(policy.enforcement_action.as_str())
        .bind(policy.severity_threshold.as_str())
        .bind(serde_json::to_value(&policy.scope)?)
        .bind(policy.priority)
        .bind(policy.enabled)
        .bind(policy.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save policy: {e}")))?;
        Ok(())
    }

    async fn find_by_id(&self, id: PolicyId) -> Result<Option<SecurityPolicy>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {POLICY_COLUMNS} FROM security_policies WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_policy).transpose()
    }

    async fn list_by_organization(&self, organization_id: OrganizationId) -> Result<Vec<SecurityPolicy>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM security_policies WHERE organization_id = $1 ORDER BY created_at"
        ))
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_policy).collect()
    }
}

fn row_to_signals(row: &PgRow) -> Result<OperationalSignals, RepositoryError> {
    let allowed: i64 = row.try_get("actions_allowed")?;
    let denied: i64 = row.try_get("actions_denied")?;
    let feedback_sum: i64 = row.try_get("feedback_sum")?;
    let feedback_count: i64 = row.try_get("feedback_count")?;

    Ok(OperationalSignals {
        agent_id: AgentId(row.try_get("agent_id")?),
        actions_allowed: from_db_count(allowed),
        actions_denied: from_db_count(denied),
        uptime_ratio: row.try_get("uptime_ratio")?,
        compliance_score: row.try_get("compliance_score")?,
        feedback_sum: from_db_count(feedback_sum),
        feedback_count: from_db_count(feedback_count),
        updated_at: row.try_get("updated_at")?,
    })
}

pub struct PostgresSignalRepository {
    pool: PgPool,
}

impl PostgresSignalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalRepository for PostgresSignalRepository {
    async fn get(&self, agent_id: AgentId) -> Result<OperationalSignals, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SIGNAL_COLUMNS} FROM operational_signals WHERE agent_id = $1"))
            .bind(agent_id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_signals(&row),
            None => Ok(OperationalSignals::new(agent_id)),
        }
    }

    async fn record_action(&self, agent_id: AgentId, allowed: bool) -> Result<(), RepositoryError> {
        let (allowed_inc, denied_inc): (i64, i64) = if allowed { (1, 0) } else { (0, 1) };
        sqlx::query(
            r#"
            INSERT INTO operational_signals (agent_id, actions_allowed, actions_denied)
            VALUES ($1, $2, $3)
            ON CONFLICT (agent_id) DO UPDATE SET
                actions_allowed = operational_signals.actions_allowed + EXCLUDED.actions_allowed,
                actions_denied = operational_signals.actions_denied + EXCLUDED.actions_denied
            "#,
        )
        .bind(agent_id.0)
        .bind(allowed_inc)
        .bind(denied_inc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merge_report(
        &self,
        agent_id: AgentId,
        report: &SignalReport,
        now: DateTime<Utc>,
    ) -> Result<OperationalSignals, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO operational_signals (agent_id) VALUES ($1) ON CONFLICT (agent_id) DO NOTHING")
            .bind(agent_id.0)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM operational_signals WHERE agent_id = $1 FOR UPDATE"
        ))
        .bind(agent_id.0)
        .fetch_one(&mut *tx)
        .await?;

        let mut signals = row_to_signals(&row)?;
        report.merge_into(&mut signals, now);

        sqlx::query(
            r#"
            UPDATE operational_signals SET
                uptime_ratio = $2,
                compliance_score = $3,
                feedback_sum = $4,
                feedback_count = $5,
                updated_at = $6
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id.0)
        .bind(signals.uptime_ratio)
        .bind(signals.compliance_score)
        .bind(to_db_count(signals.feedback_sum))
        .bind(to_db_count(signals.feedback_count))
        .bind(signals.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(signals)
    }
}

pub struct PostgresBootstrapStateRepository {
    pool: PgPool,
}

impl PostgresBootstrapStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BootstrapStateRepository for PostgresBootstrapStateRepository {
    async fn is_bootstrapped(&self) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM bootstrap_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_bootstrapped(&self, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let result = sqlx::query("INSERT INTO bootstrap_state (id, completed_at) VALUES (1, $1) ON CONFLICT (id) DO NOTHING")
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_conversion_saturates() {
        assert_eq!(to_db_count(u64::MAX), i64::MAX);
        assert_eq!(to_db_count(42), 42);
        assert_eq!(from_db_count(-1), 0);
        assert_eq!(from_db_count(7), 7);
    }

    #[test]
    fn test_agent_columns_cover_aggregate() {
        for column in ["trust_score", "key_material", "version", "capabilities"] {
            assert!(AGENT_COLUMNS.contains(column));
        }
    }
}
