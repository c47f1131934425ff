// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! First-run initialization.
//!
//! [`BootstrapService::run_once`] claims the persisted bootstrap flag before it
//! does anything else, so concurrent starts against the same store seed at most
//! once. Later starts are no-ops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::agent::OrganizationId;
use crate::domain::capability::Severity;
use crate::domain::clock::Clock;
use crate::domain::config::BootstrapConfig;
use crate::domain::errors::EngineError;
use crate::domain::policy::{EnforcementAction, PolicyError, PolicyRule, PolicyScope, SecurityPolicy};
use crate::domain::repository::{BootstrapStateRepository, PolicyRepository};

/// Baseline policy set for a new organization.
pub fn default_policies(organization_id: OrganizationId, now: DateTime<Utc>) -> Result<Vec<SecurityPolicy>, PolicyError> {
    let policy = |name: &str, rule: PolicyRule, action: EnforcementAction, threshold: Severity, priority: i32| {
        SecurityPolicy::new(
            organization_id,
            name,
            rule,
            action,
            threshold,
            PolicyScope::AllAgents,
            priority,
            now,
        )
    };

    Ok(vec![
        policy(
            "Block critical capability violations",
            PolicyRule::CapabilityViolation { capabilities: None },
            EnforcementAction::BlockAndAlert,
            Severity::Critical,
            100,
        )?,
        policy(
            "Alert on low trust",
            PolicyRule::TrustThreshold { minimum_score: 0.3 },
            EnforcementAction::AlertOnly,
            Severity::Medium,
            50,
        )?,
        policy(
            "Alert on configuration drift",
            PolicyRule::ConfigurationDrift { max_deviation_pct: 0.5 },
            EnforcementAction::AlertOnly,
            Severity::Medium,
            40,
        )?,
        policy(
            "Alert on attestation failures",
            PolicyRule::AttestationFailure,
            EnforcementAction::AlertOnly,
            Severity::High,
            30,
        )?,
        policy(
            "Alert on capability violations",
            PolicyRule::CapabilityViolation { capabilities: None },
            EnforcementAction::AlertOnly,
            Severity::Low,
            10,
        )?,
    ])
}

pub struct BootstrapService {
    state_repo: Arc<dyn BootstrapStateRepository>,
    policy_repo: Arc<dyn PolicyRepository>,
    clock: Arc<dyn Clock>,
}

impl BootstrapService {
    pub fn new(
        state_repo: Arc<dyn BootstrapStateRepository>,
        policy_repo: Arc<dyn PolicyRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state_repo,
            policy_repo,
            clock,
        }
    }

    /// Returns `true` when this call performed the initialization.
    pub async fn run_once(&self, config: &BootstrapConfig) -> Result<bool, EngineError> {
        let organization_id = config
            .organization_id
            .as_deref()
            .map(|raw| {
                OrganizationId::from_string(raw)
                    .map_err(|e| EngineError::InvalidInput(format!("bootstrap organization_id '{raw}': {e}")))
            })
            .transpose()?;

        let now = self.clock.now();
        if !self.state_repo.mark_bootstrapped(now).await? {
            info!("Trust engine already bootstrapped");
            return Ok(false);
        }

        match organization_id {
            Some(organization_id) if config.seed_default_policies => {
                let policies = default_policies(organization_id, now)?;
                for policy in &policies {
                    self.policy_repo.save(policy).await?;
                }
                info!(organization_id = %organization_id, count = policies.len(), "Default security policies seeded");
            }
            _ => info!("Bootstrap complete; no default policies seeded"),
        }
        Ok(true)
    }
}
