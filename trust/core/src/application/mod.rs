// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_registry;
pub mod attestation_service;
pub mod bootstrap;
pub mod capability_enforcement;
pub mod drift_detector;
pub mod engine;
pub mod key_lifecycle;
pub mod policy_evaluator;
pub mod repository_factory;
pub mod trust_score;

// Re-export services for convenience
pub use agent_registry::{AgentRegistry, RegisterAgentRequest};
pub use attestation_service::{AttestationSubmission, AttestationVerifier};
pub use bootstrap::BootstrapService;
pub use capability_enforcement::{ActionDecision, ActionRequest, CapabilityGrantRequest, DecisionEngine};
pub use drift_detector::DriftDetector;
pub use engine::TrustEngine;
pub use key_lifecycle::KeyLifecycleManager;
pub use policy_evaluator::SecurityPolicyEvaluator;
pub use repository_factory::Repositories;
pub use trust_score::{TrustRecalculationQueue, TrustScoreCalculator};
