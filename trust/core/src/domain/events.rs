// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Domain Events - published on the in-process event bus after state changes commit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::attestation::{AttestationId, McpServerId};
use crate::domain::capability::{Severity, ViolationId};
use crate::domain::policy::{EnforcementAction, PolicyId};
use crate::domain::trust::SnapshotSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentLifecycleEvent {
    AgentRegistered {
        agent_id: AgentId,
        agent_type: String,
        registered_at: DateTime<Utc>,
    },
    AgentStatusChanged {
        agent_id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
        changed_at: DateTime<Utc>,
    },
    AgentCompromised {
        agent_id: AgentId,
        marked_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CapabilityEvent {
    CapabilityGranted {
        agent_id: AgentId,
        capability_type: String,
        granted_at: DateTime<Utc>,
    },
    CapabilityRevoked {
        agent_id: AgentId,
        capability_type: String,
        revoked_at: DateTime<Utc>,
    },
    ViolationRecorded {
        violation_id: ViolationId,
        agent_id: AgentId,
        attempted_capability: String,
        severity: Severity,
        enforcement_action: EnforcementAction,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrustEvent {
    TrustScoreUpdated {
        agent_id: AgentId,
        previous_score: f64,
        score: f64,
        source: SnapshotSource,
        computed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyEvent {
    KeyIssued {
        agent_id: AgentId,
        public_key: String,
        issued_at: DateTime<Utc>,
    },
    KeyRotated {
        agent_id: AgentId,
        public_key: String,
        rotation_count: u32,
        grace_period_end: DateTime<Utc>,
    },
    PreviousKeyRevoked {
        agent_id: AgentId,
        revoked_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AttestationEvent {
    AttestationVerified {
        attestation_id: AttestationId,
        mcp_server_id: McpServerId,
        agent_id: AgentId,
        confidence_contribution: f64,
        verified_at: DateTime<Utc>,
    },
    AttestationRejected {
        attestation_id: AttestationId,
        mcp_server_id: McpServerId,
        agent_id: Option<AgentId>,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
    AttestationsExpired {
        count: u64,
        swept_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DriftEvent {
    BaselineEstablished {
        agent_id: AgentId,
        metric: String,
        baseline_value: f64,
        sample_count: usize,
        established_at: DateTime<Utc>,
    },
    DriftDetected {
        agent_id: AgentId,
        metric: String,
        deviation_pct: f64,
        detected_at: DateTime<Utc>,
    },
    /// Too few samples in the window to rebuild the baseline.
    BaselineRetired {
        agent_id: AgentId,
        metric: String,
        retired_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PolicyEvent {
    PolicyMatched {
        policy_id: PolicyId,
        agent_id: AgentId,
        event_type: String,
        enforcement_action: EnforcementAction,
        matched_at: DateTime<Utc>,
    },
}
