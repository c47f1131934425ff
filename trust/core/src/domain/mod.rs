// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod attestation;
pub mod capability;
pub mod clock;
pub mod config;
pub mod drift;
pub mod errors;
pub mod events;
pub mod keys;
pub mod policy;
pub mod repository;
pub mod signals;
pub mod trust;

pub use agent::{Agent, AgentId, AgentStatus, OrganizationId};
pub use attestation::{Attestation, AttestationPayload, McpServerId};
pub use capability::{CapabilityGrant, CapabilityViolation, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::EngineError;
pub use keys::{KeyMaterial, VerificationKeySet};
pub use policy::{EnforcementAction, SecurityPolicy};
pub use trust::TrustScoreSnapshot;
