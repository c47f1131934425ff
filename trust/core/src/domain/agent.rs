// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! The agent record owned by an organization. It embeds the capability grants,
//! the trust-score mirror and the signing key material, and carries a `version`
//! that every writer must present back to the repository (optimistic locking).
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──► verified ◄──► suspended
//!    │            │             │
//!    └────────────┴─────────────┴──► revoked (terminal)
//! ```
//!
//! Agents are never deleted; `revoked` is the end of the line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::capability::CapabilityGrant;
use crate::domain::errors::EngineError;
use crate::domain::keys::KeyMaterial;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationId(pub Uuid);

impl OrganizationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for OrganizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Verified,
    Suspended,
    Revoked,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Suspended => "suspended",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "suspended" => Some(Self::Suspended),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    /// Whether an agent in this status may perform runtime actions at all.
    pub fn may_act(&self) -> bool {
        matches!(self, Self::Pending | Self::Verified)
    }

    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (*self, next) {
            (Revoked, _) => false,
            (_, Revoked) => true,
            (Pending, Verified) | (Pending, Suspended) => true,
            (Verified, Suspended) | (Suspended, Verified) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub organization_id: OrganizationId,
    pub name: String,
    /// Free-form label matched by `PolicyScope::AgentType`.
    pub agent_type: String,
    pub status: AgentStatus,
    pub capabilities: Vec<CapabilityGrant>,
    /// Mirror of the newest `TrustScoreSnapshot::score`. Written only through
    /// `AgentRepository::commit_trust_snapshot`.
    pub trust_score: f64,
    pub key_material: Option<KeyMaterial>,
    pub is_compromised: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the repository on every write.
    pub version: u64,
}

impl Agent {
    pub fn new(
        organization_id: OrganizationId,
        name: impl Into<String>,
        agent_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AgentId::new(),
            organization_id,
            name: name.into(),
            agent_type: agent_type.into(),
            status: AgentStatus::Pending,
            capabilities: Vec::new(),
            trust_score: 0.0,
            key_material: None,
            is_compromised: false,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Capability types with at least one unrevoked grant.
    pub fn active_capabilities(&self) -> BTreeSet<String> {
        self.capabilities
            .iter()
            .filter(|g| g.is_active())
            .map(|g| g.capability_type.clone())
            .collect()
    }

    pub fn has_capability(&self, capability_type: &str) -> bool {
        self.capabilities
            .iter()
            .any(|g| g.is_active() && g.capability_type == capability_type)
    }

    /// Grant a capability. Granting an already active capability is a no-op that
    /// returns the original grant time.
    pub fn grant_capability(
        &mut self,
        capability_type: &str,
        scope: serde_json::Value,
        granted_by: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, EngineError> {
        if self.status == AgentStatus::Revoked {
            return Err(EngineError::AgentInactive {
                agent_id: self.id,
                status: self.status,
            });
        }

        if let Some(existing) = self
            .capabilities
            .iter()
            .find(|g| g.is_active() && g.capability_type == capability_type)
        {
            return Ok(existing.granted_at);
        }

        self.capabilities.push(CapabilityGrant {
            capability_type: capability_type.to_string(),
            scope,
            granted_by: granted_by.to_string(),
            granted_at: now,
            revoked_at: None,
        });
        self.updated_at = now;
        Ok(now)
    }

    /// Revoke every active grant of `capability_type`.
    pub fn revoke_capability(
        &mut self,
        capability_type: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, EngineError> {
        let mut revoked_any = false;
        for grant in self
            .capabilities
            .iter_mut()
            .filter(|g| g.is_active() && g.capability_type == capability_type)
        {
            grant.revoked_at = Some(now);
            revoked_any = true;
        }

        if !revoked_any {
            return Err(EngineError::CapabilityNotGranted {
                agent_id: self.id,
                capability: capability_type.to_string(),
            });
        }
        self.updated_at = now;
        Ok(now)
    }

    pub fn transition_to(&mut self, next: AgentStatus, now: DateTime<Utc>) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Ensure the agent may perform runtime actions or sign claims.
    pub fn ensure_may_act(&self) -> Result<(), EngineError> {
        if self.is_compromised {
            return Err(EngineError::AgentCompromised(self.id));
        }
        if !self.status.may_act() {
            return Err(EngineError::AgentInactive {
                agent_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}
