// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory
//!
//! Builds the full set of repository implementations for the configured
//! storage backend. The domain layer only sees the traits.

use std::sync::Arc;

use sqlx::PgPool;

use crate::domain::repository::{
    AgentRepository, AttestationRepository, BaselineRepository, BootstrapStateRepository,
    PolicyRepository, SignalRepository, ViolationRepository,
};
use crate::infrastructure::repositories::postgres::{
    PostgresAgentRepository, PostgresAttestationRepository, PostgresBaselineRepository,
    PostgresBootstrapStateRepository, PostgresPolicyRepository, PostgresSignalRepository,
    PostgresViolationRepository,
};
use crate::infrastructure::repositories::{
    InMemoryAgentRepository, InMemoryAttestationRepository, InMemoryBaselineRepository,
    InMemoryBootstrapStateRepository, InMemoryPolicyRepository, InMemorySignalRepository,
    InMemoryViolationRepository,
};

#[derive(Clone)]
pub struct Repositories {
    pub agents: Arc<dyn AgentRepository>,
    pub violations: Arc<dyn ViolationRepository>,
    pub attestations: Arc<dyn AttestationRepository>,
    pub baselines: Arc<dyn BaselineRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub signals: Arc<dyn SignalRepository>,
    pub bootstrap: Arc<dyn BootstrapStateRepository>,
}

impl Repositories {
    /// Process-local stores. Nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            agents: Arc::new(InMemoryAgentRepository::new()),
            violations: Arc::new(InMemoryViolationRepository::new()),
            attestations: Arc::new(InMemoryAttestationRepository::new()),
            baselines: Arc::new(InMemoryBaselineRepository::new()),
            policies: Arc::new(InMemoryPolicyRepository::new()),
            signals: Arc::new(InMemorySignalRepository::new()),
            bootstrap: Arc::new(InMemoryBootstrapStateRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            agents: Arc::new(PostgresAgentRepository::new(pool.clone())),
            violations: Arc::new(PostgresViolationRepository::new(pool.clone())),
            attestations: Arc::new(PostgresAttestationRepository::new(pool.clone())),
            baselines: Arc::new(PostgresBaselineRepository::new(pool.clone())),
            policies: Arc::new(PostgresPolicyRepository::new(pool.clone())),
            signals: Arc::new(PostgresSignalRepository::new(pool.clone())),
            bootstrap: Arc::new(PostgresBootstrapStateRepository::new(pool)),
        }
    }
}
