// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Security Policies
//!
//! Organization-scoped rules that turn a [`SecurityEvent`] into an
//! [`EnforcementAction`]. Rules are a closed set of variants whose parameters are
//! validated when the policy is built. There is no general-purpose policy language.
//!
//! A policy can add alerting to a capability violation, but it never turns a
//! violation into an allowed action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::{AgentId, OrganizationId};
use crate::domain::attestation::McpServerId;
use crate::domain::capability::Severity;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error("Policy name must not be empty")]
    EmptyName,

    #[error("Capability list must not be empty when present")]
    EmptyCapabilityList,

    #[error("Trust threshold must be within [0, 1], got {0}")]
    InvalidTrustThreshold(f64),

    #[error("Maximum deviation must be a positive finite number, got {0}")]
    InvalidDeviation(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub Uuid);

impl PolicyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PolicyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementAction {
    Allow,
    AlertOnly,
    BlockAndAlert,
}

impl EnforcementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::AlertOnly => "alert_only",
            Self::BlockAndAlert => "block_and_alert",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Self::Allow),
            "alert_only" => Some(Self::AlertOnly),
            "block_and_alert" => Some(Self::BlockAndAlert),
            _ => None,
        }
    }

    pub fn alerts(&self) -> bool {
        !matches!(self, Self::Allow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyScope {
    AllAgents,
    Agent { agent_id: AgentId },
    AgentType { agent_type: String },
}

impl PolicyScope {
    pub fn covers(&self, agent_id: AgentId, agent_type: &str) -> bool {
        match self {
            Self::AllAgents => true,
            Self::Agent { agent_id: id } => *id == agent_id,
            Self::AgentType { agent_type: t } => t == agent_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy_type", rename_all = "snake_case")]
pub enum PolicyRule {
    /// Matches capability violations, optionally only for the listed capabilities.
    CapabilityViolation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capabilities: Option<Vec<String>>,
    },
    /// Matches trust drops that land below `minimum_score`.
    TrustThreshold { minimum_score: f64 },
    /// Matches drift anomalies whose absolute deviation exceeds `max_deviation_pct`.
    ConfigurationDrift { max_deviation_pct: f64 },
    AttestationFailure,
}

impl PolicyRule {
    pub fn validate(&self) -> Result<(), PolicyError> {
        match self {
            Self::CapabilityViolation {
                capabilities: Some(list),
            } if list.is_empty() || list.iter().any(|c| c.trim().is_empty()) => {
                Err(PolicyError::EmptyCapabilityList)
            }
            Self::TrustThreshold { minimum_score }
                if !minimum_score.is_finite() || !(0.0..=1.0).contains(minimum_score) =>
            {
                Err(PolicyError::InvalidTrustThreshold(*minimum_score))
            }
            Self::ConfigurationDrift { max_deviation_pct }
                if !max_deviation_pct.is_finite() || *max_deviation_pct <= 0.0 =>
            {
                Err(PolicyError::InvalidDeviation(*max_deviation_pct))
            }
            _ => Ok(()),
        }
    }

    pub fn matches(&self, event: &SecurityEventKind) -> bool {
        match (self, event) {
            (Self::CapabilityViolation { capabilities }, SecurityEventKind::CapabilityViolation { capability, .. }) => {
                capabilities
                    .as_ref()
                    .is_none_or(|list| list.iter().any(|c| c == capability))
            }
            (Self::TrustThreshold { minimum_score }, SecurityEventKind::TrustScoreDrop { score, .. }) => {
                score < minimum_score
            }
            (Self::ConfigurationDrift { max_deviation_pct }, SecurityEventKind::ConfigurationDrift { deviation_pct, .. }) => {
                deviation_pct.abs() > *max_deviation_pct
            }
            (Self::AttestationFailure, SecurityEventKind::AttestationFailure { .. }) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub id: PolicyId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub rule: PolicyRule,
    pub enforcement_action: EnforcementAction,
    pub severity_threshold: Severity,
    pub scope: PolicyScope,
    /// Higher wins.
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl SecurityPolicy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: OrganizationId,
        name: impl Into<String>,
        rule: PolicyRule,
        enforcement_action: EnforcementAction,
        severity_threshold: Severity,
        scope: PolicyScope,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Result<Self, PolicyError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }
        rule.validate()?;

        Ok(Self {
            id: PolicyId::new(),
            organization_id,
            name,
            rule,
            enforcement_action,
            severity_threshold,
            scope,
            priority,
            enabled: true,
            created_at: now,
        })
    }

    pub fn applies_to(&self, event: &SecurityEvent) -> bool {
        self.enabled
            && self.organization_id == event.organization_id
            && self.scope.covers(event.agent_id, &event.agent_type)
            && event.severity >= self.severity_threshold
            && self.rule.matches(&event.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SecurityEventKind {
    CapabilityViolation { capability: String, resource: String },
    TrustScoreDrop { previous_score: f64, score: f64 },
    ConfigurationDrift { metric: String, deviation_pct: f64 },
    AttestationFailure { mcp_server_id: McpServerId, reason: String },
}

impl SecurityEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CapabilityViolation { .. } => "capability_violation",
            Self::TrustScoreDrop { .. } => "trust_score_drop",
            Self::ConfigurationDrift { .. } => "configuration_drift",
            Self::AttestationFailure { .. } => "attestation_failure",
        }
    }

    /// Outcome when no policy matches.
    pub fn default_action(&self) -> EnforcementAction {
        match self {
            Self::CapabilityViolation { .. } => EnforcementAction::AlertOnly,
            _ => EnforcementAction::Allow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub organization_id: OrganizationId,
    pub agent_id: AgentId,
    pub agent_type: String,
    pub severity: Severity,
    pub kind: SecurityEventKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub matched_policy: Option<PolicyId>,
    pub policy_name: Option<String>,
    pub enforcement_action: EnforcementAction,
}

impl PolicyDecision {
    pub fn unmatched(event: &SecurityEventKind) -> Self {
        Self {
            matched_policy: None,
            policy_name: None,
            enforcement_action: event.default_action(),
        }
    }

    pub fn matched(policy: &SecurityPolicy) -> Self {
        Self {
            matched_policy: Some(policy.id),
            policy_name: Some(policy.name.clone()),
            enforcement_action: policy.enforcement_action,
        }
    }
}
