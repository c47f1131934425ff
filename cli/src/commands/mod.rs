// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the trust engine CLI

pub mod config;
pub mod keygen;

pub use self::config::ConfigCommand;
