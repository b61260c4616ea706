//! Resource types held in the store.
//!
//! `AlertRule` is the user-facing resource; `Deployment` is the workload it
//! watches; `PrometheusRule` and `ConfigMap` are the two artifact kinds the
//! operator renders. All of them serialize to the camelCase JSON shape the
//! platform exposes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::meta::{Kind, ObjectMeta, Resource};

// ── AlertRule ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup-only pointer to the workload an alert rule watches. It is not an
/// ownership relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReference {
    pub namespace: String,
    pub name: String,
}

/// Single-rule AlertRule spec. This is the canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AlertRuleSpec {
    #[serde(rename = "alert", alias = "alertName")]
    pub alert_name: String,
    /// PromQL predicate.
    #[serde(rename = "expr", alias = "expression")]
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// How long `expression` must hold before the alert fires.
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_ref: Option<DeploymentReference>,
}

/// Where a rule-list alert is delivered. Empty channels are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationChannel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    pub name: String,
    pub condition: String,
    pub duration: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<NotificationChannel>,
}

/// Multi-rule AlertRule spec with notification channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleListSpec {
    pub rules: Vec<RuleDefinition>,
    pub target_deployment: String,
}

/// The two AlertRule spec shapes. They are decoded strictly: a document
/// carrying fields of both is rejected rather than merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertRuleShape {
    Fixed(AlertRuleSpec),
    List(RuleListSpec),
}

impl AlertRuleShape {
    pub fn as_fixed(&self) -> Option<&AlertRuleSpec> {
        match self {
            AlertRuleShape::Fixed(spec) => Some(spec),
            AlertRuleShape::List(_) => None,
        }
    }

    /// Name of the workload this rule points back to, if any.
    pub fn deployment_name(&self) -> Option<&str> {
        match self {
            AlertRuleShape::Fixed(spec) => spec.deployment_ref.as_ref().map(|r| r.name.as_str()),
            AlertRuleShape::List(spec) => Some(spec.target_deployment.as_str()),
        }
    }
}

impl From<AlertRuleSpec> for AlertRuleShape {
    fn from(spec: AlertRuleSpec) -> Self {
        AlertRuleShape::Fixed(spec)
    }
}

impl From<RuleListSpec> for AlertRuleShape {
    fn from(spec: RuleListSpec) -> Self {
        AlertRuleShape::List(spec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
    pub observed_generation: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRuleStatus {
    /// At most one entry per `type`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    pub metadata: ObjectMeta,
    pub spec: AlertRuleShape,
    #[serde(default)]
    pub status: AlertRuleStatus,
}

impl AlertRule {
    pub fn new(namespace: &str, name: &str, spec: impl Into<AlertRuleShape>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: spec.into(),
            status: AlertRuleStatus::default(),
        }
    }
}

impl Resource for AlertRule {
    const KIND: Kind = Kind::AlertRule;
    const HAS_STATUS: bool = true;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// ── Deployment ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

fn default_replicas() -> i32 {
    1
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            selector: BTreeMap::new(),
        }
    }
}

/// A workload. The operator only consumes its identity and deletion state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeploymentSpec,
}

impl Deployment {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: DeploymentSpec::default(),
        }
    }
}

impl Resource for Deployment {
    const KIND: Kind = Kind::Deployment;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// ── Artifacts ─────────────────────────────────────────────────────

/// One alerting rule inside a rule group. Label and annotation maps keep
/// the order the renderer inserted them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub alert: String,
    pub expr: String,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    pub labels: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    pub rules: Vec<RuleEntry>,
}

/// Rendered alerting configuration, independent of the kind that stores it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleGroupDocument {
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrometheusRule {
    pub metadata: ObjectMeta,
    pub spec: RuleGroupDocument,
}

impl Resource for PrometheusRule {
    const KIND: Kind = Kind::PrometheusRule;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl Resource for ConfigMap {
    const KIND: Kind = Kind::ConfigMap;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
