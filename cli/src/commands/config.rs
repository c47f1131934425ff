// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use aegis_trust_core::domain::config::{StorageBackend, TrustEngineConfig};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file populated with defaults
    Generate {
        /// Output path (default: ./aegis-trust.yaml)
        #[arg(short, long, default_value = "./aegis-trust.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(&output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = TrustEngineConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. AEGIS_TRUST_CONFIG_PATH: {}",
            std::env::var("AEGIS_TRUST_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./aegis-trust.yaml");
        println!("  4. ~/.aegis/trust.yaml");
        println!("  5. /etc/aegis/trust.yaml");
        println!();
    }

    if as_yaml {
        let mut redacted = config.clone();
        if redacted.spec.keys.master_key.is_some() {
            redacted.spec.keys.master_key = Some("<redacted>".to_string());
        }
        if redacted.spec.storage.database_url.is_some() {
            redacted.spec.storage.database_url = Some("<redacted>".to_string());
        }
        print!("{}", serde_yaml::to_string(&redacted).context("Failed to render configuration")?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Network:".bold());
    println!("  Listen: {}:{}", spec.network.bind_address, spec.network.port);
    println!();

    println!("{}", "Storage:".bold());
    match spec.storage.backend {
        StorageBackend::Memory => println!("  Backend: memory {}", "(not persistent)".yellow()),
        StorageBackend::Postgres => println!("  Backend: postgres"),
    }
    println!();

    println!("{}", "Keys:".bold());
    println!("  Lifetime: {}", humanize(spec.keys.key_lifetime));
    println!("  Grace period: {}", humanize(spec.keys.grace_period));
    println!(
        "  Master key: {}",
        if spec.keys.master_key.is_some() {
            "configured".green()
        } else {
            "ephemeral".yellow()
        }
    );
    println!();

    println!("{}", "Attestation:".bold());
    println!("  Validity: {}", humanize(spec.attestation.validity));
    println!("  Freshness window: {}", humanize(spec.attestation.freshness_window));
    println!();

    println!("{}", "Drift:".bold());
    println!("  Threshold: {:.0}%", spec.drift.threshold * 100.0);
    println!("  Window: {}", humanize(spec.drift.window));
    println!("  Min samples: {}", spec.drift.min_samples);
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        spec.observability.logging.level, spec.observability.logging.format
    );
    if spec.observability.metrics.enabled {
        println!("  Metrics: enabled on port {}", spec.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }

    Ok(())
}

fn humanize(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        s if s >= 86_400 && s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s >= 3_600 && s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s >= 60 && s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = TrustEngineConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite", output.display());
    }

    TrustEngineConfig::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_loads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis-trust.yaml");

        generate(&path, false).unwrap();
        let loaded = TrustEngineConfig::from_yaml_file(&path).unwrap();
        loaded.validate().unwrap();
        assert_eq!(loaded.spec.drift.min_samples, 3);
    }

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis-trust.yaml");
        std::fs::write(&path, "keep me").unwrap();

        assert!(generate(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
        generate(&path, true).unwrap();
    }

    #[test]
    fn test_humanize_durations() {
        assert_eq!(humanize(std::time::Duration::from_secs(90 * 86_400)), "90d");
        assert_eq!(humanize(std::time::Duration::from_secs(3_600)), "1h");
        assert_eq!(humanize(std::time::Duration::from_secs(300)), "5m");
        assert_eq!(humanize(std::time::Duration::from_secs(45)), "45s");
    }
}
