// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Trust Engine Configuration
//
// Defines the configuration schema for the AEGIS trust engine, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Key lifecycle, attestation, drift and trust scoring tunables
// - Storage backend selection (in-memory or PostgreSQL)
// - Network, logging and metrics settings
// - First-run bootstrap (default organization and policies)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "TrustEngineConfig";

/// Top-level Kubernetes-style trust engine configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEngineConfig {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "TrustEngineConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: TrustEngineSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable instance name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustEngineSpec {
    #[serde(default)]
    pub keys: KeyConfig,

    #[serde(default)]
    pub attestation: AttestationConfig,

    #[serde(default)]
    pub drift: DriftConfig,

    #[serde(default)]
    pub trust: TrustConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    /// How long the previous key stays valid after a rotation
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,

    /// Lifetime of a freshly issued key
    #[serde(with = "humantime_serde", default = "default_key_lifetime")]
    pub key_lifetime: Duration,

    /// Base64 encoded 32-byte AES-256-GCM key sealing agent private keys.
    /// Prefer `AEGIS_TRUST_MASTER_KEY` over writing it to disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            key_lifetime: default_key_lifetime(),
            master_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationConfig {
    /// Validity of a verified attestation
    #[serde(with = "humantime_serde", default = "default_attestation_validity")]
    pub validity: Duration,

    /// Accepted clock skew on payload timestamps (either direction)
    #[serde(with = "humantime_serde", default = "default_freshness_window")]
    pub freshness_window: Duration,

    /// How often expired attestations are swept
    #[serde(with = "humantime_serde", default = "default_hourly")]
    pub sweep_interval: Duration,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            validity: default_attestation_validity(),
            freshness_window: default_freshness_window(),
            sweep_interval: default_hourly(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Absolute deviation above which a metric is anomalous (fraction, e.g. 0.25)
    #[serde(default = "default_drift_threshold")]
    pub threshold: f64,

    /// Rolling window baselines are computed over
    #[serde(with = "humantime_serde", default = "default_drift_window")]
    pub window: Duration,

    /// Minimum samples inside the window before a baseline is established
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    #[serde(with = "humantime_serde", default = "default_hourly")]
    pub refresh_interval: Duration,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            threshold: default_drift_threshold(),
            window: default_drift_window(),
            min_samples: default_min_samples(),
            refresh_interval: default_hourly(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Look-back window for the security alert factor
    #[serde(with = "humantime_serde", default = "default_lookback")]
    pub lookback_window: Duration,

    /// Scores below this floor raise a `TrustScoreDrop` security event
    #[serde(default = "default_alert_floor")]
    pub alert_floor: f64,

    /// Capacity of the asynchronous recalculation queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retries for trust writes that lose a version race
    #[serde(default = "default_write_retries")]
    pub max_write_retries: u32,

    /// Timeout for a single recalculation
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub timeout: Duration,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            lookback_window: default_lookback(),
            alert_floor: default_alert_floor(),
            queue_capacity: default_queue_capacity(),
            max_write_retries: default_write_retries(),
            timeout: default_call_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Timeout for loading the policy set of an organization
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub lookup_timeout: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: default_call_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Required for the postgres backend. Prefer `AEGIS_TRUST_DATABASE_URL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus exposition
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Organization that owns the seeded policies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Seed the default policy set on first start
    #[serde(default = "default_true")]
    pub seed_default_policies: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            organization_id: None,
            seed_default_policies: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_grace_period() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_key_lifetime() -> Duration {
    Duration::from_secs(90 * 24 * 60 * 60)
}

fn default_attestation_validity() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_freshness_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_hourly() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_drift_threshold() -> f64 {
    0.25
}

fn default_drift_window() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_min_samples() -> usize {
    3
}

fn default_lookback() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_alert_floor() -> f64 {
    0.5
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_write_retries() -> u32 {
    3
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}

fn default_max_connections() -> u32 {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8088
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

/// Convert a configured duration to a chrono duration, saturating on overflow.
pub fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `now + duration`, clamped to the latest representable instant.
pub fn time_after(now: chrono::DateTime<chrono::Utc>, duration: Duration) -> chrono::DateTime<chrono::Utc> {
    now.checked_add_signed(chrono_duration(duration))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

/// `now - duration`, clamped to the earliest representable instant.
pub fn time_before(now: chrono::DateTime<chrono::Utc>, duration: Duration) -> chrono::DateTime<chrono::Utc> {
    now.checked_sub_signed(chrono_duration(duration))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}

impl Default for TrustEngineConfig {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "aegis-trust".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: TrustEngineSpec::default(),
        }
    }
}

impl TrustEngineConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AEGIS_TRUST_CONFIG_PATH environment variable
    /// 2. ./aegis-trust.yaml (working directory)
    /// 3. ~/.aegis/trust.yaml (user home)
    /// 4. /etc/aegis/trust.yaml (system, Unix) or C:\ProgramData\Aegis\trust.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AEGIS_TRUST_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./aegis-trust.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".aegis").join("trust.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/aegis/trust.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Aegis\\trust.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    /// Secrets are expected to arrive this way in container deployments
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("AEGIS_TRUST_DATABASE_URL") {
            tracing::info!("Environment override: AEGIS_TRUST_DATABASE_URL (backend=postgres)");
            self.spec.storage.database_url = Some(url);
            self.spec.storage.backend = StorageBackend::Postgres;
        }

        if let Ok(key) = std::env::var("AEGIS_TRUST_MASTER_KEY") {
            tracing::info!("Environment override: AEGIS_TRUST_MASTER_KEY");
            self.spec.keys.master_key = Some(key);
        }

        if let Ok(level) = std::env::var("AEGIS_TRUST_LOG_LEVEL") {
            tracing::info!("Environment override: AEGIS_TRUST_LOG_LEVEL={}", level);
            self.spec.observability.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        for (name, value) in [
            ("spec.keys.grace_period", spec.keys.grace_period),
            ("spec.keys.key_lifetime", spec.keys.key_lifetime),
            ("spec.attestation.validity", spec.attestation.validity),
            ("spec.attestation.freshness_window", spec.attestation.freshness_window),
            ("spec.attestation.sweep_interval", spec.attestation.sweep_interval),
            ("spec.drift.window", spec.drift.window),
            ("spec.drift.refresh_interval", spec.drift.refresh_interval),
            ("spec.trust.lookback_window", spec.trust.lookback_window),
            ("spec.trust.timeout", spec.trust.timeout),
            ("spec.policy.lookup_timeout", spec.policy.lookup_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        if spec.keys.grace_period >= spec.keys.key_lifetime {
            anyhow::bail!("spec.keys.grace_period must be shorter than spec.keys.key_lifetime");
        }

        for (name, value) in [
            ("spec.drift.threshold", spec.drift.threshold),
            ("spec.trust.alert_floor", spec.trust.alert_floor),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                anyhow::bail!("{} must be within (0, 1], got {}", name, value);
            }
        }

        if spec.drift.min_samples == 0 {
            anyhow::bail!("spec.drift.min_samples must be at least 1");
        }

        if spec.trust.queue_capacity == 0 {
            anyhow::bail!("spec.trust.queue_capacity must be at least 1");
        }

        if let Some(key) = &spec.keys.master_key {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(key.trim())
                .map_err(|e| anyhow::anyhow!("spec.keys.master_key is not valid base64: {}", e))?;
            if decoded.len() != 32 {
                anyhow::bail!(
                    "spec.keys.master_key must decode to 32 bytes, got {}",
                    decoded.len()
                );
            }
        }

        if spec.storage.backend == StorageBackend::Postgres {
            match &spec.storage.database_url {
                Some(url) if !url.is_empty() => {}
                _ => anyhow::bail!("spec.storage.database_url is required for the postgres backend"),
            }
            if spec.keys.master_key.is_none() {
                anyhow::bail!("spec.keys.master_key is required for the postgres backend");
            }
        }

        if let Some(org) = &spec.bootstrap.organization_id {
            uuid::Uuid::parse_str(org)
                .map_err(|e| anyhow::anyhow!("spec.bootstrap.organization_id is not a UUID: {}", e))?;
        }

        match spec.observability.logging.format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("Unknown log format '{}'. Expected 'json' or 'text'", other),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = TrustEngineConfig::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.keys.grace_period, Duration::from_secs(86_400));
        assert_eq!(manifest.spec.attestation.freshness_window, Duration::from_secs(300));
        assert_eq!(manifest.spec.drift.min_samples, 3);
        assert_eq!(manifest.spec.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_yaml_with_humantime_durations() {
        let yaml = r#"
apiVersion: 100monkeys.ai/v1
kind: TrustEngineConfig
metadata:
  name: trust-eu-1
spec:
  keys:
    grace_period: 12h
    key_lifetime: 30days
  attestation:
    freshness_window: 2m
  drift:
    threshold: 0.4
  network:
    port: 9000
"#;
        let manifest = TrustEngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "trust-eu-1");
        assert_eq!(manifest.spec.keys.grace_period, Duration::from_secs(12 * 3600));
        assert_eq!(manifest.spec.keys.key_lifetime, Duration::from_secs(30 * 86_400));
        assert_eq!(manifest.spec.attestation.freshness_window, Duration::from_secs(120));
        assert_eq!(manifest.spec.attestation.validity, Duration::from_secs(30 * 86_400));
        assert_eq!(manifest.spec.drift.threshold, 0.4);
        assert_eq!(manifest.spec.network.port, 9000);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis-trust.yaml");

        let mut manifest = TrustEngineConfig::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.trust.alert_floor = 0.3;
        manifest.to_yaml_file(&path).unwrap();

        let parsed = TrustEngineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(parsed.metadata.name, "roundtrip");
        assert_eq!(parsed.spec.trust.alert_floor, 0.3);
        assert_eq!(parsed.spec.keys.grace_period, manifest.spec.keys.grace_period);
    }

    #[test]
    fn test_validation() {
        let mut manifest = TrustEngineConfig::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.metadata.name = "".to_string();
        assert!(manifest.validate().is_err());
        manifest.metadata.name = "trust".to_string();

        manifest.spec.drift.threshold = 1.5;
        assert!(manifest.validate().is_err());
        manifest.spec.drift.threshold = 0.25;

        manifest.spec.attestation.freshness_window = Duration::ZERO;
        assert!(manifest.validate().is_err());
        manifest.spec.attestation.freshness_window = Duration::from_secs(300);

        manifest.spec.keys.master_key = Some("not-base64!".to_string());
        assert!(manifest.validate().is_err());
        manifest.spec.keys.master_key = None;

        manifest.spec.storage.backend = StorageBackend::Postgres;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_chrono_duration_saturates() {
        assert_eq!(chrono_duration(Duration::from_secs(60)), chrono::Duration::seconds(60));
        assert_eq!(chrono_duration(Duration::MAX), chrono::Duration::MAX);

        let now = chrono::Utc::now();
        assert_eq!(time_after(now, Duration::MAX), chrono::DateTime::<chrono::Utc>::MAX_UTC);
        assert_eq!(time_before(now, Duration::MAX), chrono::DateTime::<chrono::Utc>::MIN_UTC);
        assert_eq!(time_before(now, Duration::from_secs(60)), now - chrono::Duration::seconds(60));
    }
}
