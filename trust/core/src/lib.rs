// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AEGIS Trust Core
//!
//! Capability enforcement, trust scoring, attestation verification and key
//! lifecycle for registered agents and the MCP servers they connect to.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Decides whether agent actions are allowed and how much each
//!   agent (and each tool server it vouches for) can be trusted.
//!
//! ```text
//! presentation::api ──► application::capability_enforcement ──► application::policy_evaluator
//!                              │                                         ▲
//!                              ▼                                         │
//!                     application::trust_score ◄── application::drift_detector
//!                              ▲
//!            application::key_lifecycle ──► infrastructure::crypto ◄── application::attestation_service
//! ```
//!
//! [`application::TrustEngine`] wires every service from one configuration.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
