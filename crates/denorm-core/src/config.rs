//! denorm.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::serde_duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DenormConfig {
    pub store: StoreConfig,
    pub coordinator: CoordinatorConfig,
    pub broker: BrokerConfig,
    pub determination: DeterminationConfig,
}

/// Where the rule repository keeps its data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/denorm"),
        }
    }
}

/// Rule lifecycle coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Location of the coordination namespace.
    pub coordination_address: String,
    /// Number of worker partitions that must acknowledge a rule.
    pub partition_count: u32,
    pub replication_factor: u32,
    /// Namespace prefix under which workers acknowledge rules.
    pub rules_path: String,
    /// Namespace prefix under which bootstrap batches are written.
    pub bootstrapper_path: String,
    #[serde(with = "serde_duration")]
    pub cycle_interval: Duration,
    #[serde(with = "serde_duration")]
    pub initial_delay: Duration,
    /// Upper bound on any single namespace or broker operation.
    #[serde(with = "serde_duration")]
    pub operation_timeout: Duration,
    #[serde(with = "serde_duration")]
    pub shutdown_grace: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordination_address: "/var/lib/denorm/namespace.redb".to_string(),
            partition_count: 6,
            replication_factor: 1,
            rules_path: "/rules".to_string(),
            bootstrapper_path: "/bootstrapper".to_string(),
            cycle_interval: Duration::from_secs(20),
            initial_delay: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(3),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Message broker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker addresses for an external cluster. Informational only: the
    /// daemon provisions topics on its in-process broker and only logs this.
    pub bootstrap_servers: String,
    pub bootstrap_topic: String,
    pub shutdown_topic: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            bootstrap_topic: "bootstrap".to_string(),
            shutdown_topic: "shutdown".to_string(),
        }
    }
}

/// Rule determination engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeterminationConfig {
    /// Maximum number of rules that may be outstanding at once.
    pub max_rule_capacity: u32,
    #[serde(with = "serde_duration")]
    pub cycle_interval: Duration,
    /// Samples retained per query shape.
    pub reservoir_capacity: usize,
}

impl Default for DeterminationConfig {
    fn default() -> Self {
        Self {
            max_rule_capacity: 50,
            cycle_interval: Duration::from_secs(60),
            reservoir_capacity: 1028,
        }
    }
}

impl DenormConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    /// Parse and validate config text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DenormConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the control plane cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.coordinator;
        positive("coordinator.partition_count", c.partition_count)?;
        positive("coordinator.replication_factor", c.replication_factor)?;
        non_zero_duration("coordinator.cycle_interval", c.cycle_interval)?;
        non_zero_duration("coordinator.operation_timeout", c.operation_timeout)?;
        absolute_path("coordinator.rules_path", &c.rules_path)?;
        absolute_path("coordinator.bootstrapper_path", &c.bootstrapper_path)?;
        non_empty("coordinator.coordination_address", &c.coordination_address)?;

        let b = &self.broker;
        non_empty("broker.bootstrap_topic", &b.bootstrap_topic)?;
        non_empty("broker.shutdown_topic", &b.shutdown_topic)?;
        if b.bootstrap_topic == b.shutdown_topic {
            return Err(ConfigError::Invalid {
                field: "broker.shutdown_topic",
                reason: "must differ from broker.bootstrap_topic".to_string(),
            });
        }

        let d = &self.determination;
        positive("determination.max_rule_capacity", d.max_rule_capacity)?;
        non_zero_duration("determination.cycle_interval", d.cycle_interval)?;
        if d.reservoir_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "determination.reservoir_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn non_zero_duration(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be a non-zero duration".to_string(),
        });
    }
    Ok(())
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn absolute_path(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with('/') || (value.len() > 1 && value.ends_with('/')) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value:?} must be an absolute namespace path"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DenormConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_minimal() {
        let config = DenormConfig::from_toml_str("").unwrap();
        assert_eq!(config, DenormConfig::default());
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
[store]
data_dir = "/tmp/denorm"

[coordinator]
coordination_address = "/tmp/denorm/ns.redb"
partition_count = 12
replication_factor = 3
rules_path = "/ezapp/rules"
bootstrapper_path = "/ezapp/bootstrapper"
cycle_interval = "5s"
initial_delay = "0s"
operation_timeout = "500ms"
shutdown_grace = "1m"

[broker]
bootstrap_servers = "kafka-1:9092,kafka-2:9092"
bootstrap_topic = "denorm.bootstrap"
shutdown_topic = "denorm.shutdown"

[determination]
max_rule_capacity = 3
cycle_interval = "30s"
reservoir_capacity = 512
"#;
        let config = DenormConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.coordinator.partition_count, 12);
        assert_eq!(config.coordinator.rules_path, "/ezapp/rules");
        assert_eq!(config.coordinator.cycle_interval, Duration::from_secs(5));
        assert_eq!(config.coordinator.initial_delay, Duration::ZERO);
        assert_eq!(config.coordinator.operation_timeout, Duration::from_millis(500));
        assert_eq!(config.coordinator.shutdown_grace, Duration::from_secs(60));
        assert_eq!(config.broker.bootstrap_topic, "denorm.bootstrap");
        assert_eq!(config.determination.max_rule_capacity, 3);
        assert_eq!(config.determination.reservoir_capacity, 512);
    }

    #[test]
    fn round_trips_through_toml() {
        let config = DenormConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("cycle_interval = \"20s\""));
        assert_eq!(DenormConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn rejects_zero_partitions() {
        let err = DenormConfig::from_toml_str("[coordinator]\npartition_count = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "coordinator.partition_count", .. }
        ));
    }

    #[test]
    fn rejects_relative_namespace_path() {
        let err = DenormConfig::from_toml_str("[coordinator]\nrules_path = \"rules\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "coordinator.rules_path", .. }));
    }

    #[test]
    fn rejects_shared_topic_names() {
        let toml_str = "[broker]\nbootstrap_topic = \"t\"\nshutdown_topic = \"t\"\n";
        assert!(DenormConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn bare_integer_durations_are_seconds() {
        let toml_str = "[coordinator]\ncycle_interval = 20\ninitial_delay = \"0\"\n\n[determination]\ncycle_interval = 90\n";
        let config = DenormConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.coordinator.cycle_interval, Duration::from_secs(20));
        assert_eq!(config.coordinator.initial_delay, Duration::ZERO);
        assert_eq!(config.determination.cycle_interval, Duration::from_secs(90));
    }

    #[test]
    fn empty_bootstrap_servers_are_accepted() {
        let config =
            DenormConfig::from_toml_str("[broker]\nbootstrap_servers = \"\"\n").unwrap();
        assert!(config.broker.bootstrap_servers.is_empty());
    }

    #[test]
    fn rejects_bad_duration() {
        let err =
            DenormConfig::from_toml_str("[coordinator]\ncycle_interval = \"often\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = DenormConfig::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn from_file_reads_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("denorm.toml");
        std::fs::write(&path, "[determination]\nmax_rule_capacity = 7\n").unwrap();
        let config = DenormConfig::from_file(&path).unwrap();
        assert_eq!(config.determination.max_rule_capacity, 7);
    }
}
