//! slicegrid.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    AcceleratorOrder, DEFAULT_DOMAIN, DEFAULT_RESOURCE_VENDOR, DEFAULT_SLOT_COUNT,
    PlacementPolicy,
};

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("placement policy `{0}` is not implemented")]
    PolicyNotImplemented(PlacementPolicy),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Controller configuration. Every field has a default, so an empty file
/// is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceConfig {
    /// Name of the scheduling gate and of the protection finalizer.
    pub domain: String,
    /// Substring identifying accelerator resource keys in container limits.
    pub resource_vendor: String,
    pub policy: PlacementPolicy,
    pub accelerator_order: AcceleratorOrder,
    /// Slot count assumed for inventories that do not report one.
    pub slot_count: u32,
    /// Number of concurrent reconciliation workers.
    pub workers: usize,
    /// Time a released workload keeps its slice after deletion starts.
    pub grace_period_secs: u64,
    /// Fixed delay before retrying a failed write.
    pub retry_delay_ms: u64,
    /// Bounds of the randomized delay used when nothing fits.
    pub jitter_min_secs: u64,
    pub jitter_max_secs: u64,
    /// Interval of the full-inventory metrics refresh.
    pub metrics_interval_secs: u64,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            resource_vendor: DEFAULT_RESOURCE_VENDOR.to_string(),
            policy: PlacementPolicy::FirstFit,
            accelerator_order: AcceleratorOrder::Declared,
            slot_count: DEFAULT_SLOT_COUNT,
            workers: 4,
            grace_period_secs: 30,
            retry_delay_ms: 1000,
            jitter_min_secs: 1,
            jitter_max_secs: 10,
            metrics_interval_secs: 15,
        }
    }
}

impl SliceConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(?path, "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a configuration document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SliceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.policy.is_implemented() {
            return Err(ConfigError::PolicyNotImplemented(self.policy));
        }
        if self.domain.is_empty() {
            return Err(ConfigError::Invalid("domain must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if !(1..=64).contains(&self.slot_count) {
            return Err(ConfigError::Invalid(format!(
                "slot_count must be within 1..=64, got {}",
                self.slot_count
            )));
        }
        if self.metrics_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "metrics_interval_secs must be at least 1".into(),
            ));
        }
        if self.jitter_min_secs > self.jitter_max_secs {
            return Err(ConfigError::Invalid(format!(
                "jitter_min_secs ({}) exceeds jitter_max_secs ({})",
                self.jitter_min_secs, self.jitter_max_secs
            )));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn jitter_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.jitter_min_secs),
            Duration::from_secs(self.jitter_max_secs),
        )
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = SliceConfig::from_toml("").unwrap();
        assert_eq!(config, SliceConfig::default());
        assert_eq!(config.grace_period(), Duration::from_secs(30));
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(
            config.jitter_bounds(),
            (Duration::from_secs(1), Duration::from_secs(10))
        );
    }

    #[test]
    fn parse_overrides() {
        let config = SliceConfig::from_toml(
            r#"
domain = "example.com/slice"
accelerator_order = "name"
workers = 8
grace_period_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(config.domain, "example.com/slice");
        assert_eq!(config.accelerator_order, AcceleratorOrder::Name);
        assert_eq!(config.workers, 8);
        assert_eq!(config.grace_period_secs, 5);
        assert_eq!(config.slot_count, DEFAULT_SLOT_COUNT);
    }

    #[test]
    fn unimplemented_policy_fails_fast() {
        let err = SliceConfig::from_toml("policy = \"left_to_right\"").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::PolicyNotImplemented(PlacementPolicy::LeftToRight)
        ));
    }

    #[test]
    fn inverted_jitter_bounds_rejected() {
        let err = SliceConfig::from_toml("jitter_min_secs = 12").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_metrics_interval_rejected() {
        let err = SliceConfig::from_toml("metrics_interval_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(SliceConfig::from_toml("metrics_interval_secs = 1").is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(SliceConfig::from_toml("workers = 0").is_err());
        assert!(SliceConfig::from_toml("slot_count = 65").is_err());
    }

    #[test]
    fn render_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slicegrid.toml");
        let rendered = SliceConfig::default().to_toml_string().unwrap();
        std::fs::write(&path, rendered).unwrap();

        let loaded = SliceConfig::from_file(&path).unwrap();
        assert_eq!(loaded, SliceConfig::default());
    }
}
