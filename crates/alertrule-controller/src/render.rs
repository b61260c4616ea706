//! RuleRenderer — AlertRule spec to rule-group document.
//!
//! Rendering is a pure function of its input: no store access, no clock,
//! and map iteration only over ordered maps, so the serialized output is
//! byte-identical across calls and usable as a change fingerprint.
//!
//! Label precedence for the single-rule shape:
//!
//! ```text
//! managed-by = <operator identity>     built-in, never overridable
//! severity   = <spec.severity>         built-in, user label wins
//! <release>  = <value>                 built-in, user label wins
//! <user labels, sorted by key>         overlay
//! ```

use indexmap::IndexMap;
use thiserror::Error;

use alertrule_core::{ConfigError, OperatorConfig, is_valid_duration};
use alertrule_state::{
    AlertRuleShape, AlertRuleSpec, RuleDefinition, RuleEntry, RuleGroup, RuleGroupDocument,
    RuleListSpec, Severity,
};

use crate::identity::{MANAGED_BY_LABEL, group_name};

/// Why a spec cannot be rendered. Deterministic: the same spec fails the
/// same way until it is edited.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("alert name is empty")]
    EmptyAlertName,

    #[error("alert {0:?} has an empty expression")]
    EmptyExpression(String),

    #[error("alert {alert:?} has invalid duration {value:?}")]
    InvalidDuration { alert: String, value: String },

    #[error("rule list is empty")]
    EmptyRuleList,

    #[error("target deployment is empty")]
    EmptyTargetDeployment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRenderer {
    managed_by: String,
    release_label: Option<(String, String)>,
}

impl RuleRenderer {
    pub fn new(managed_by: impl Into<String>) -> Self {
        Self {
            managed_by: managed_by.into(),
            release_label: None,
        }
    }

    /// Renderer stamping the configured identity and release label.
    pub fn from_config(config: &OperatorConfig) -> Result<Self, ConfigError> {
        let renderer = Self::new(config.operator.identity.clone());
        Ok(match config.artifact.release_label_pair()? {
            Some((key, value)) => renderer.with_release_label(key, value),
            None => renderer,
        })
    }

    /// Selector label the rule evaluator uses to pick up rules.
    pub fn with_release_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.release_label = Some((key.into(), value.into()));
        self
    }

    /// Render the rule group for the AlertRule named `name`.
    pub fn render(&self, name: &str, shape: &AlertRuleShape) -> Result<RuleGroupDocument, RenderError> {
        match shape {
            AlertRuleShape::Fixed(spec) => self.render_fixed(name, spec),
            AlertRuleShape::List(spec) => self.render_list(name, spec),
        }
    }

    fn render_fixed(&self, name: &str, spec: &AlertRuleSpec) -> Result<RuleGroupDocument, RenderError> {
        if spec.alert_name.is_empty() {
            return Err(RenderError::EmptyAlertName);
        }
        if spec.expression.trim().is_empty() {
            return Err(RenderError::EmptyExpression(spec.alert_name.clone()));
        }
        let for_duration = checked_duration(&spec.alert_name, spec.for_duration.as_deref())?;

        let mut labels = self.builtin_labels(spec.severity);
        for (key, value) in &spec.labels {
            labels.insert(key.clone(), value.clone());
        }
        labels.insert(MANAGED_BY_LABEL.to_string(), self.managed_by.clone());

        let annotations: IndexMap<String, String> = spec
            .annotations
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(RuleGroupDocument {
            groups: vec![RuleGroup {
                name: group_name(name),
                rules: vec![RuleEntry {
                    alert: spec.alert_name.clone(),
                    expr: spec.expression.clone(),
                    for_duration,
                    labels,
                    annotations,
                }],
            }],
        })
    }

    fn render_list(&self, name: &str, spec: &RuleListSpec) -> Result<RuleGroupDocument, RenderError> {
        if spec.rules.is_empty() {
            return Err(RenderError::EmptyRuleList);
        }
        if spec.target_deployment.is_empty() {
            return Err(RenderError::EmptyTargetDeployment);
        }
        let rules = spec
            .rules
            .iter()
            .map(|rule| render_definition(rule, &spec.target_deployment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RuleGroupDocument {
            groups: vec![RuleGroup {
                name: name.to_string(),
                rules,
            }],
        })
    }

    fn builtin_labels(&self, severity: Option<Severity>) -> IndexMap<String, String> {
        let mut labels = IndexMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), self.managed_by.clone());
        if let Some(severity) = severity {
            labels.insert("severity".to_string(), severity.to_string());
        }
        if let Some((key, value)) = &self.release_label {
            labels.insert(key.clone(), value.clone());
        }
        labels
    }
}

fn render_definition(rule: &RuleDefinition, deployment: &str) -> Result<RuleEntry, RenderError> {
    if rule.name.is_empty() {
        return Err(RenderError::EmptyAlertName);
    }
    if rule.condition.trim().is_empty() {
        return Err(RenderError::EmptyExpression(rule.name.clone()));
    }
    let for_duration = checked_duration(&rule.name, Some(&rule.duration))?;

    let mut labels = IndexMap::new();
    labels.insert("alertname".to_string(), rule.name.clone());
    labels.insert("severity".to_string(), rule.severity.to_string());
    labels.insert("deployment".to_string(), deployment.to_string());

    let mut annotations = IndexMap::new();
    annotations.insert("summary".to_string(), rule.name.clone());
    annotations.insert("severity".to_string(), rule.severity.to_string());
    for channel in &rule.notifications {
        if let Some(discord) = channel.discord.as_deref().filter(|s| !s.is_empty()) {
            annotations.insert("discord".to_string(), discord.to_string());
        }
        if let Some(email) = channel.email.as_deref().filter(|s| !s.is_empty()) {
            annotations.insert("email".to_string(), email.to_string());
        }
    }

    Ok(RuleEntry {
        alert: rule.name.clone(),
        expr: rule.condition.clone(),
        for_duration,
        labels,
        annotations,
    })
}

/// Empty means absent; anything else must parse.
fn checked_duration(alert: &str, value: Option<&str>) -> Result<Option<String>, RenderError> {
    match value {
        None | Some("") => Ok(None),
        Some(v) if is_valid_duration(v) => Ok(Some(v.to_string())),
        Some(v) => Err(RenderError::InvalidDuration {
            alert: alert.to_string(),
            value: v.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertrule_state::NotificationChannel;
    use std::collections::BTreeMap;

    fn renderer() -> RuleRenderer {
        RuleRenderer::new("alert-rule-operator").with_release_label("release", "prometheus")
    }

    fn spec() -> AlertRuleSpec {
        AlertRuleSpec {
            alert_name: "checkoutPodDown".to_string(),
            expression: "up{job=\"checkout\"} == 0".to_string(),
            severity: Some(Severity::Critical),
            for_duration: Some("1m".to_string()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            deployment_ref: None,
        }
    }

    fn only_rule(doc: &RuleGroupDocument) -> &RuleEntry {
        assert_eq!(doc.groups.len(), 1);
        assert_eq!(doc.groups[0].rules.len(), 1);
        &doc.groups[0].rules[0]
    }

    #[test]
    fn fixed_shape_renders_one_group() {
        let doc = renderer()
            .render("checkout-alert", &AlertRuleShape::Fixed(spec()))
            .unwrap();
        assert_eq!(doc.groups[0].name, "checkout-alert-group");

        let rule = only_rule(&doc);
        assert_eq!(rule.alert, "checkoutPodDown");
        assert_eq!(rule.expr, "up{job=\"checkout\"} == 0");
        assert_eq!(rule.for_duration.as_deref(), Some("1m"));
        assert_eq!(rule.labels["managed-by"], "alert-rule-operator");
        assert_eq!(rule.labels["severity"], "critical");
        assert_eq!(rule.labels["release"], "prometheus");
    }

    #[test]
    fn empty_optionals_are_omitted() {
        let mut s = spec();
        s.for_duration = Some(String::new());
        s.severity = None;
        let doc = renderer().render("a", &s.into()).unwrap();
        let rule = only_rule(&doc);
        assert!(rule.for_duration.is_none());
        assert!(!rule.labels.contains_key("severity"));

        let json = serde_json::to_value(&doc).unwrap();
        let entry = &json["groups"][0]["rules"][0];
        assert!(entry.get("for").is_none());
        assert!(entry.get("annotations").is_none());
    }

    #[test]
    fn operator_identity_is_never_overridden() {
        let mut s = spec();
        s.labels.insert("managed-by".to_string(), "custom".to_string());
        let doc = renderer().render("a", &s.into()).unwrap();
        assert_eq!(only_rule(&doc).labels["managed-by"], "alert-rule-operator");
    }

    #[test]
    fn other_collisions_resolve_to_user_value() {
        let mut s = spec();
        s.labels.insert("severity".to_string(), "page".to_string());
        s.labels.insert("release".to_string(), "thanos".to_string());
        s.labels.insert("team".to_string(), "payments".to_string());
        let doc = renderer().render("a", &s.into()).unwrap();
        let labels = &only_rule(&doc).labels;
        assert_eq!(labels["severity"], "page");
        assert_eq!(labels["release"], "thanos");
        assert_eq!(labels["team"], "payments");
    }

    #[test]
    fn render_is_deterministic() {
        let mut s = spec();
        for key in ["zeta", "alpha", "mid"] {
            s.labels.insert(key.to_string(), key.to_uppercase());
            s.annotations.insert(key.to_string(), key.to_string());
        }
        let shape = AlertRuleShape::Fixed(s);
        let a = serde_json::to_vec(&renderer().render("a", &shape).unwrap()).unwrap();
        let b = serde_json::to_vec(&renderer().render("a", &shape).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_inputs_fail() {
        let mut s = spec();
        s.for_duration = Some("a while".to_string());
        assert!(matches!(
            renderer().render("a", &s.clone().into()),
            Err(RenderError::InvalidDuration { .. })
        ));

        s.for_duration = None;
        s.expression = "  ".to_string();
        assert_eq!(
            renderer().render("a", &s.clone().into()),
            Err(RenderError::EmptyExpression("checkoutPodDown".to_string()))
        );

        s.alert_name = String::new();
        assert_eq!(renderer().render("a", &s.into()), Err(RenderError::EmptyAlertName));
    }

    fn list_spec() -> RuleListSpec {
        RuleListSpec {
            rules: vec![
                RuleDefinition {
                    name: "HighErrorRate".to_string(),
                    condition: "rate(errors[5m]) > 0.1".to_string(),
                    duration: "5m".to_string(),
                    severity: Severity::Warning,
                    notifications: vec![
                        NotificationChannel {
                            discord: Some("https://discord.example/hook".to_string()),
                            email: None,
                        },
                        NotificationChannel {
                            discord: Some(String::new()),
                            email: Some("oncall@example.com".to_string()),
                        },
                    ],
                },
                RuleDefinition {
                    name: "PodDown".to_string(),
                    condition: "up == 0".to_string(),
                    duration: "1m".to_string(),
                    severity: Severity::Critical,
                    notifications: vec![],
                },
            ],
            target_deployment: "checkout".to_string(),
        }
    }

    #[test]
    fn list_shape_keeps_declared_order() {
        let doc = renderer().render("checkout-rules", &list_spec().into()).unwrap();
        let group = &doc.groups[0];
        assert_eq!(group.name, "checkout-rules");
        let names: Vec<_> = group.rules.iter().map(|r| r.alert.as_str()).collect();
        assert_eq!(names, ["HighErrorRate", "PodDown"]);

        let first = &group.rules[0];
        let label_keys: Vec<_> = first.labels.keys().map(String::as_str).collect();
        assert_eq!(label_keys, ["alertname", "severity", "deployment"]);
        assert_eq!(first.labels["deployment"], "checkout");

        let annotation_keys: Vec<_> = first.annotations.keys().map(String::as_str).collect();
        assert_eq!(annotation_keys, ["summary", "severity", "discord", "email"]);
    }

    #[test]
    fn from_config_uses_release_label() {
        let mut config = OperatorConfig::default();
        config.artifact.release_label = "prometheus=kube".to_string();
        let renderer = RuleRenderer::from_config(&config).unwrap();
        let doc = renderer.render("a", &spec().into()).unwrap();
        assert_eq!(only_rule(&doc).labels["prometheus"], "kube");
        assert!(!only_rule(&doc).labels.contains_key("release"));
    }

    #[test]
    fn list_shape_rejects_empty_list() {
        let mut s = list_spec();
        s.rules.clear();
        assert_eq!(renderer().render("x", &s.into()), Err(RenderError::EmptyRuleList));
    }
}
