// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Capability Grants and Violations
//!
//! A capability is a named permission (`file:read`, `db:query`, ...) an agent
//! declares at registration. Grants are embedded in the [`crate::domain::agent::Agent`]
//! aggregate; violations are append-only records written by the decision engine.
//!
//! ## Severity Table
//!
//! | Action           | Severity | Trust delta |
//! |------------------|----------|-------------|
//! | `file:read`      | high     | 0.15        |
//! | `file:write`     | critical | 0.20        |
//! | `file:delete`    | critical | 0.25        |
//! | `db:query`       | critical | 0.20        |
//! | `db:write`       | critical | 0.25        |
//! | `network:access` | critical | 0.25        |
//! | `api:call`       | medium   | 0.10        |
//! | `system:exec`    | critical | 0.30        |
//! | `system:admin`   | critical | 0.30        |
//! | anything else    | medium   | 0.10        |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::policy::PolicyId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub capability_type: String,
    /// Capability-specific scope, e.g. `{"paths": ["/workspace"]}` for `file:read`.
    pub scope: Value,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CapabilityGrant {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity and immediate trust penalty of an out-of-capability action.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViolationClass {
    pub severity: Severity,
    pub trust_delta: f64,
}

/// Classify an attempted action using the fixed severity table.
pub fn classify_action(action_type: &str) -> ViolationClass {
    let (severity, trust_delta) = match action_type {
        "file:read" => (Severity::High, 0.15),
        "file:write" => (Severity::Critical, 0.20),
        "file:delete" => (Severity::Critical, 0.25),
        "db:query" => (Severity::Critical, 0.20),
        "db:write" => (Severity::Critical, 0.25),
        "network:access" => (Severity::Critical, 0.25),
        "api:call" => (Severity::Medium, 0.10),
        "system:exec" | "system:admin" => (Severity::Critical, 0.30),
        _ => (Severity::Medium, 0.10),
    };
    ViolationClass {
        severity,
        trust_delta,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViolationId(pub Uuid);

impl ViolationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViolationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ViolationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only record of an action attempted outside the agent's capability set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityViolation {
    pub id: ViolationId,
    pub agent_id: AgentId,
    pub attempted_capability: String,
    pub resource: String,
    /// Active capability set at the moment of the attempt.
    pub registered_capabilities: BTreeSet<String>,
    pub severity: Severity,
    pub trust_score_impact: f64,
    pub blocked: bool,
    pub source_context: Value,
    pub matched_policy_id: Option<PolicyId>,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_table() {
        let read = classify_action("file:read");
        assert_eq!(read.severity, Severity::High);
        assert!((read.trust_delta - 0.15).abs() < f64::EPSILON);

        let exec = classify_action("system:exec");
        assert_eq!(exec.severity, Severity::Critical);
        assert!((exec.trust_delta - 0.30).abs() < f64::EPSILON);

        let net = classify_action("network:access");
        assert_eq!(net.severity, Severity::Critical);
        assert!((net.trust_delta - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_action_is_medium() {
        let class = classify_action("quantum:teleport");
        assert_eq!(class.severity, Severity::Medium);
        assert!((class.trust_delta - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::parse("high"), Some(Severity::High));
        assert_eq!(Severity::parse("severe"), None);
    }
}
