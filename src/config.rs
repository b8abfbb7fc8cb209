//! Configuration management for Tollgate.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{GateError, Result};
use crate::ratelimit::resolve_burst;

/// Prefix for environment overrides, e.g. `TOLLGATE__LOGGING__LEVEL=debug`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Stale bucket eviction, shared by every policy
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Admission layer configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Named rate limit policies
    #[serde(default = "default_policies")]
    pub policies: BTreeMap<String, PolicyConfig>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            eviction: EvictionConfig::default(),
            admission: AdmissionConfig::default(),
            policies: default_policies(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Eviction policy for idle buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Minimum seconds between two sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Seconds without a refill after which a bucket is evicted
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval(),
            stale_threshold_secs: default_stale_threshold(),
        }
    }
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_stale_threshold() -> u64 {
    3600
}

/// Admission layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Policy applied when a caller does not name one
    #[serde(default = "default_policy_name")]
    pub default_policy: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy_name(),
        }
    }
}

fn default_policy_name() -> String {
    "default".to_string()
}

/// A rate limit policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Sustained rate
    pub requests_per_minute: f64,

    /// Bucket capacity; defaults to `requests_per_minute`
    #[serde(default)]
    pub burst_size: Option<u32>,
}

impl PolicyConfig {
    pub fn new(requests_per_minute: f64, burst_size: u32) -> Self {
        Self {
            requests_per_minute,
            burst_size: Some(burst_size),
        }
    }
}

fn default_policies() -> BTreeMap<String, PolicyConfig> {
    BTreeMap::from([
        ("default".to_string(), PolicyConfig::new(60.0, 10)),
        ("strict".to_string(), PolicyConfig::new(20.0, 5)),
        ("upload".to_string(), PolicyConfig::new(10.0, 2)),
    ])
}

impl GateConfig {
    /// Load configuration from an optional file, then apply environment
    /// overrides (`TOLLGATE__SECTION__KEY`).
    ///
    /// The file format follows its extension (`.yaml`, `.toml`, `.json`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: GateConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce working limiters.
    pub fn validate(&self) -> Result<()> {
        if self.policies.is_empty() {
            return Err(GateError::Config(
                "at least one rate limit policy is required".to_string(),
            ));
        }

        for (name, policy) in &self.policies {
            resolve_burst(policy.requests_per_minute, policy.burst_size).map_err(|reason| {
                GateError::InvalidPolicy {
                    policy: name.clone(),
                    reason,
                }
            })?;
        }

        if !self.policies.contains_key(&self.admission.default_policy) {
            return Err(GateError::Config(format!(
                "default policy '{}' is not configured",
                self.admission.default_policy
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();

        assert_eq!(config.eviction.cleanup_interval_secs, 300);
        assert_eq!(config.eviction.stale_threshold_secs, 3600);
        assert_eq!(config.admission.default_policy, "default");
        assert_eq!(config.policies["default"], PolicyConfig::new(60.0, 10));
        assert_eq!(config.policies["strict"], PolicyConfig::new(20.0, 5));
        assert_eq!(config.policies["upload"], PolicyConfig::new(10.0, 2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
logging:
  level: debug
eviction:
  cleanup_interval_secs: 60
policies:
  default:
    requests_per_minute: 120
  search:
    requests_per_minute: 30
    burst_size: 3
"#;
        let config = GateConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json);
        assert_eq!(config.eviction.cleanup_interval_secs, 60);
        assert_eq!(config.eviction.stale_threshold_secs, 3600);
        assert_eq!(config.policies.len(), 2);
        assert_eq!(config.policies["default"].burst_size, None);
        assert_eq!(config.policies["search"], PolicyConfig::new(30.0, 3));
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = GateConfig::from_yaml("{}").unwrap();
        assert_eq!(config.policies.len(), 3);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let yaml = r#"
policies:
  default:
    requests_per_minute: 60
  broken:
    requests_per_minute: -5
"#;
        match GateConfig::from_yaml(yaml) {
            Err(GateError::InvalidPolicy { policy, .. }) => assert_eq!(policy, "broken"),
            other => panic!("expected invalid policy, got {:?}", other),
        }
    }

    #[test]
    fn test_subnormal_rate_rejected() {
        let yaml = r#"
policies:
  default:
    requests_per_minute: 5e-324
    burst_size: 1
"#;
        assert!(matches!(
            GateConfig::from_yaml(yaml),
            Err(GateError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_zero_burst_rejected() {
        let yaml = r#"
policies:
  default:
    requests_per_minute: 60
    burst_size: 0
"#;
        assert!(matches!(
            GateConfig::from_yaml(yaml),
            Err(GateError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_negative_burst_fails_to_parse() {
        let yaml = r#"
policies:
  default:
    requests_per_minute: 60
    burst_size: -1
"#;
        assert!(matches!(GateConfig::from_yaml(yaml), Err(GateError::Config(_))));
    }

    #[test]
    fn test_missing_default_policy_rejected() {
        let yaml = r#"
admission:
  default_policy: missing
"#;
        assert!(matches!(GateConfig::from_yaml(yaml), Err(GateError::Config(_))));
    }

    #[test]
    fn test_load_without_file() {
        let config = GateConfig::load(None).unwrap();
        assert!(config.policies.contains_key(&config.admission.default_policy));
    }

    #[test]
    fn test_load_yaml_file() {
        let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "policies:\n  default:\n    requests_per_minute: 6\n    burst_size: 2\n",
        )
        .unwrap();

        let layered = GateConfig::load(Some(path.as_path()));
        let plain = GateConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let layered = layered.unwrap();
        assert_eq!(layered.policies.len(), 1);
        assert_eq!(layered.policies["default"], PolicyConfig::new(6.0, 2));
        assert_eq!(plain.unwrap().policies, layered.policies);
    }
}
