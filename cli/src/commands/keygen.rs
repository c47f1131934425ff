// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use colored::Colorize;

use aegis_trust_core::infrastructure::crypto::key_vault::generate_master_key;

pub fn execute() -> Result<()> {
    let key = generate_master_key();
    eprintln!(
        "{}",
        "Store this key as spec.keys.master_key or AEGIS_TRUST_MASTER_KEY. Losing it makes sealed agent keys unrecoverable."
            .yellow()
    );
    println!("{key}");
    Ok(())
}
