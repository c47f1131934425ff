// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # MCP Server Attestations
//!
//! A verified agent vouches for a tool server it connected to by signing an
//! [`AttestationPayload`] with its Ed25519 key. The signature covers the
//! canonical JSON encoding of the payload: object keys sorted lexicographically
//! at every depth, no insignificant whitespace.
//!
//! Every submission, accepted or not, becomes an append-only [`Attestation`]
//! record. Agent and server are linked only through [`AgentMcpConnection`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::keys::KeySlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct McpServerId(pub Uuid);

impl McpServerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for McpServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for McpServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationId(pub Uuid);

impl AttestationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttestationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttestationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationPayload {
    pub mcp_server_id: McpServerId,
    pub capabilities_observed: Vec<String>,
    pub connection_successful: bool,
    pub health_check_passed: bool,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub sdk_version: String,
}

impl AttestationPayload {
    /// Bytes an agent signs for this payload.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        canonical_json(&serde_json::to_value(self)?)
    }

    /// 1.0 when both connection and health check succeeded, 0.5 when one did.
    pub fn quality(&self) -> f64 {
        match (self.connection_successful, self.health_check_passed) {
            (true, true) => 1.0,
            (true, false) | (false, true) => 0.5,
            (false, false) => 0.0,
        }
    }
}

/// Serialize `value` with object keys sorted at every depth and no whitespace.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&sorted(value))
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    out.insert(key.clone(), sorted(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub id: AttestationId,
    pub mcp_server_id: McpServerId,
    /// `None` for manual attestations recorded by an operator.
    pub agent_id: Option<AgentId>,
    pub payload: Value,
    pub signature: Option<String>,
    pub verified: bool,
    pub failure_reason: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_valid: bool,
    pub confidence_contribution: f64,
    pub key_slot: Option<KeySlot>,
    pub recorded_at: DateTime<Utc>,
}

impl Attestation {
    pub fn rejected(
        mcp_server_id: McpServerId,
        agent_id: Option<AgentId>,
        payload: Value,
        signature: Option<String>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttestationId::new(),
            mcp_server_id,
            agent_id,
            payload,
            signature,
            verified: false,
            failure_reason: Some(reason.into()),
            verified_at: None,
            expires_at: None,
            is_valid: false,
            confidence_contribution: 0.0,
            key_slot: None,
            recorded_at: now,
        }
    }

    /// Operator-recorded observation with no signing agent. Never verified.
    pub fn manual(mcp_server_id: McpServerId, payload: Value, now: DateTime<Utc>) -> Self {
        Self::rejected(mcp_server_id, None, payload, None, "manual attestation", now)
    }

    /// Valid means verified and not yet past `expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.verified && self.expires_at.is_some_and(|exp| now < exp)
    }
}

/// Outcome returned to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationOutcome {
    pub attestation_id: AttestationId,
    pub verified: bool,
    pub reason: Option<String>,
    pub confidence_contribution: f64,
    pub key_slot: Option<KeySlot>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Attestation> for AttestationOutcome {
    fn from(record: &Attestation) -> Self {
        Self {
            attestation_id: record.id,
            verified: record.verified,
            reason: record.failure_reason.clone(),
            confidence_contribution: record.confidence_contribution,
            key_slot: record.key_slot,
            expires_at: record.expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMcpConnection {
    pub agent_id: AgentId,
    pub mcp_server_id: McpServerId,
    pub first_attested_at: DateTime<Utc>,
    pub last_attested_at: DateTime<Utc>,
    pub attestation_count: u64,
    pub last_latency_ms: u64,
}

impl AgentMcpConnection {
    pub fn first(agent_id: AgentId, mcp_server_id: McpServerId, latency_ms: u64, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            mcp_server_id,
            first_attested_at: now,
            last_attested_at: now,
            attestation_count: 1,
            last_latency_ms: latency_ms,
        }
    }

    pub fn record(&mut self, latency_ms: u64, now: DateTime<Utc>) {
        self.last_attested_at = now;
        self.attestation_count += 1;
        self.last_latency_ms = latency_ms;
    }
}

/// Aggregate confidence in one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfidence {
    pub mcp_server_id: McpServerId,
    pub confidence: f64,
    pub attesting_agents: usize,
}
