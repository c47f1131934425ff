// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Trust Audit Logger
//!
//! Emits structured audit records for security-relevant outcomes: capability
//! violations, rejected attestations, key rotations and compromise markings.
//!
//! Records go to the `aegis_trust::audit` tracing target so a subscriber can
//! route them separately from operational logs. The durable record lives in the
//! append-only tables; this is the real-time feed.

use tracing::{info, warn};

use crate::domain::agent::AgentId;
use crate::domain::attestation::McpServerId;
use crate::domain::capability::CapabilityViolation;
use crate::domain::policy::EnforcementAction;
use crate::infrastructure::crypto::signature;

pub const AUDIT_TARGET: &str = "aegis_trust::audit";

/// Writes trust engine security events to the structured tracing log.
#[derive(Debug, Clone, Default)]
pub struct TrustAuditLogger {}

impl TrustAuditLogger {
    pub fn new() -> Self {
        Self {}
    }

    /// Record a capability violation at `WARN` level.
    pub fn log_violation(&self, violation: &CapabilityViolation, action: EnforcementAction) {
        warn!(
            target: AUDIT_TARGET,
            violation_id = %violation.id,
            agent_id = %violation.agent_id,
            capability = %violation.attempted_capability,
            resource = %violation.resource,
            severity = %violation.severity,
            trust_impact = violation.trust_score_impact,
            enforcement = action.as_str(),
            matched_policy = ?violation.matched_policy_id,
            "Capability violation blocked"
        );
    }

    pub fn log_attestation_rejected(&self, mcp_server_id: McpServerId, agent_id: Option<AgentId>, reason: &str) {
        warn!(
            target: AUDIT_TARGET,
            mcp_server_id = %mcp_server_id,
            agent_id = ?agent_id,
            reason,
            "Attestation rejected"
        );
    }

    pub fn log_key_issued(&self, agent_id: AgentId, public_key: &str, rotation_count: u32) {
        info!(
            target: AUDIT_TARGET,
            agent_id = %agent_id,
            key_fingerprint = %signature::fingerprint(public_key),
            rotation_count,
            "Signing key issued"
        );
    }

    pub fn log_compromise(&self, agent_id: AgentId) {
        warn!(
            target: AUDIT_TARGET,
            agent_id = %agent_id,
            "Agent marked compromised; previous key revoked without grace"
        );
    }
}
