// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Engine-wide error taxonomy.
//!
//! Capability violations are outcomes, not errors: `DecisionEngine::verify`
//! returns `allowed = false` for them. The variants here cover the cases where an
//! operation could not produce an outcome at all.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::policy::PolicyError;
use crate::domain::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("Agent {agent_id} is {status} and cannot perform this operation")]
    AgentInactive { agent_id: AgentId, status: AgentStatus },

    #[error("Agent {0} is marked compromised")]
    AgentCompromised(AgentId),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: AgentStatus, to: AgentStatus },

    #[error("Capability '{capability}' is not granted to agent {agent_id}")]
    CapabilityNotGranted { agent_id: AgentId, capability: String },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Attestation expired at {0}")]
    ExpiredAttestation(DateTime<Utc>),

    #[error("Replayed attestation: {0}")]
    ReplayedAttestation(String),

    #[error("Malformed attestation: {0}")]
    MalformedAttestation(String),

    #[error("Concurrent key rotation detected for agent {0}; retry the rotation")]
    KeyRotationConflict(AgentId),

    #[error("Concurrent modification of agent {0}; retry the operation")]
    ConcurrentModification(AgentId),

    #[error("Agent {0} has no signing key")]
    KeyNotIssued(AgentId),

    #[error("Agent {0} already has a signing key; rotate it instead")]
    KeyAlreadyIssued(AgentId),

    #[error("Policy evaluation failed: {0}")]
    PolicyEvaluationFailure(String),

    #[error("Trust score computation failed: {0}")]
    TrustScoreComputationFailure(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(#[from] PolicyError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// Whether the caller may safely retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::KeyRotationConflict(_) | Self::ConcurrentModification(_) | Self::Timeout(_)
        )
    }
}
