// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod crypto;
pub mod db;
pub mod event_bus;
pub mod replay_cache;
pub mod repositories;

pub use audit::TrustAuditLogger;
pub use event_bus::{DomainEvent, EventBus, EventBusError};
pub use replay_cache::ReplayCache;
