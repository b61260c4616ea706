//! Operator configuration (`alertrule-operator.toml`).
//!
//! Every section is optional; missing values fall back to the defaults
//! below, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub operator: OperatorSection,
    pub artifact: ArtifactSection,
    pub controller: ControllerSection,
    pub store: StoreSection,
    pub api: ApiSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorSection {
    /// Value of `app.kubernetes.io/name` on generated artifacts.
    pub name: String,
    /// Operator identity marker written as `managed-by`. Never overridable
    /// by user labels.
    pub identity: String,
    /// API domain; artifacts carry an `alertrule.<domain>` back-reference label.
    pub domain: String,
}

impl Default for OperatorSection {
    fn default() -> Self {
        Self {
            name: "k8s-alert-rule-operator".to_string(),
            identity: "alert-rule-operator".to_string(),
            domain: "monitoring.my.domain".to_string(),
        }
    }
}

/// Which artifact kind the AlertRule controller maintains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactFormat {
    /// Structured `PrometheusRule` object.
    #[default]
    RuleGroup,
    /// `ConfigMap` holding `alertrules.yaml`.
    ConfigMap,
}

impl std::str::FromStr for ArtifactFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule-group" | "prometheus-rule" => Ok(Self::RuleGroup),
            "config-map" | "configmap" => Ok(Self::ConfigMap),
            other => Err(ConfigError::Invalid {
                field: "artifact.format",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSection {
    pub format: ArtifactFormat,
    /// `key=value` selector label the rule evaluator uses to discover rules.
    /// Empty string disables it.
    pub release_label: String,
}

impl Default for ArtifactSection {
    fn default() -> Self {
        Self {
            format: ArtifactFormat::RuleGroup,
            release_label: "release=prometheus".to_string(),
        }
    }
}

impl ArtifactSection {
    /// Split `release_label` into a key/value pair.
    pub fn release_label_pair(&self) -> Result<Option<(String, String)>, ConfigError> {
        if self.release_label.is_empty() {
            return Ok(None);
        }
        match self.release_label.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok(Some((k.to_string(), v.to_string()))),
            _ => Err(ConfigError::Invalid {
                field: "artifact.release_label",
                value: self.release_label.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    /// How often every key is re-reconciled (e.g. "30s").
    pub resync_interval: String,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            resync_interval: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub data_dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/alertrule-operator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self { port: 8081 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info,alertruled=debug,alertrule_controller=debug".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl OperatorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: OperatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that would only fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resync_interval()?;
        self.artifact.release_label_pair()?;
        if self.operator.identity.is_empty() {
            return Err(ConfigError::Invalid {
                field: "operator.identity",
                value: String::new(),
            });
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Result<Duration, ConfigError> {
        match parse_duration(&self.controller.resync_interval) {
            Some(d) if !d.is_zero() => Ok(d),
            _ => Err(ConfigError::Invalid {
                field: "controller.resync_interval",
                value: self.controller.resync_interval.clone(),
            }),
        }
    }
}
