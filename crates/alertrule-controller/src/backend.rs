//! Artifact backends.
//!
//! The rendered rule group is stored either as a `PrometheusRule` object
//! (structured) or as a `ConfigMap` holding a rule file under
//! [`RULE_FILE_KEY`]. Both live under the AlertRule's own name and carry a
//! controller owner reference to it, so cascade deletion removes them.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use alertrule_core::ArtifactFormat;
use alertrule_state::{
    AlertRule, ConfigMap, Kind, ObjectKey, ObjectMeta, ObjectStore, PrometheusRule, Resource,
    RuleGroupDocument, StateError, StateResult,
};

use crate::identity::{
    APP_MANAGED_BY_LABEL, APP_NAME_LABEL, OperatorIdentity, RULE_FILE_KEY, controller_reference,
};

/// What an upsert did to the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Replaced,
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to fetch {kind} {key}: {source}")]
    Fetch {
        kind: Kind,
        key: ObjectKey,
        #[source]
        source: StateError,
    },

    #[error("failed to create {kind} {key}: {source}")]
    Create {
        kind: Kind,
        key: ObjectKey,
        #[source]
        source: StateError,
    },

    #[error("failed to update {kind} {key}: {source}")]
    Update {
        kind: Kind,
        key: ObjectKey,
        #[source]
        source: StateError,
    },
}

impl ArtifactError {
    /// Condition reason recorded on the AlertRule for this failure.
    pub fn reason(&self) -> String {
        match self {
            ArtifactError::Fetch { .. } => crate::conditions::reason::ERROR.to_string(),
            ArtifactError::Create { kind, .. } => format!("{kind}CreationFailed"),
            ArtifactError::Update { kind, .. } => format!("{kind}UpdateFailed"),
        }
    }

    pub fn store_error(&self) -> &StateError {
        match self {
            ArtifactError::Fetch { source, .. }
            | ArtifactError::Create { source, .. }
            | ArtifactError::Update { source, .. } => source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.store_error().is_retryable()
    }
}

/// One way of persisting a rendered rule group.
pub trait ArtifactBackend: Send + Sync {
    fn kind(&self) -> Kind;

    /// Create or fully replace the artifact owned by `rule`.
    fn upsert(&self, rule: &AlertRule, document: &RuleGroupDocument) -> Result<Upserted, ArtifactError>;

    fn exists(&self, key: &ObjectKey) -> StateResult<bool>;

    /// Returns false if there was nothing to delete, including an artifact
    /// whose deletion is already pending on finalizers.
    fn delete(&self, key: &ObjectKey) -> StateResult<bool>;
}

/// Build the backend selected by configuration.
pub fn backend_for<S: ObjectStore>(
    format: ArtifactFormat,
    store: Arc<S>,
    identity: OperatorIdentity,
) -> Box<dyn ArtifactBackend> {
    match format {
        ArtifactFormat::RuleGroup => Box::new(PrometheusRuleBackend::new(store, identity)),
        ArtifactFormat::ConfigMap => Box::new(ConfigMapBackend::new(store, identity)),
    }
}

pub struct PrometheusRuleBackend<S> {
    store: Arc<S>,
    identity: OperatorIdentity,
}

impl<S: ObjectStore> PrometheusRuleBackend<S> {
    pub fn new(store: Arc<S>, identity: OperatorIdentity) -> Self {
        Self { store, identity }
    }
}

impl<S: ObjectStore> ArtifactBackend for PrometheusRuleBackend<S> {
    fn kind(&self) -> Kind {
        Kind::PrometheusRule
    }

    fn upsert(&self, rule: &AlertRule, document: &RuleGroupDocument) -> Result<Upserted, ArtifactError> {
        let desired = PrometheusRule {
            metadata: artifact_meta(rule, &self.identity),
            spec: document.clone(),
        };
        upsert_object(self.store.as_ref(), desired)
    }

    fn exists(&self, key: &ObjectKey) -> StateResult<bool> {
        Ok(self.store.get::<PrometheusRule>(key)?.is_some())
    }

    fn delete(&self, key: &ObjectKey) -> StateResult<bool> {
        delete_object::<S, PrometheusRule>(self.store.as_ref(), key)
    }
}

pub struct ConfigMapBackend<S> {
    store: Arc<S>,
    identity: OperatorIdentity,
}

impl<S: ObjectStore> ConfigMapBackend<S> {
    pub fn new(store: Arc<S>, identity: OperatorIdentity) -> Self {
        Self { store, identity }
    }
}

impl<S: ObjectStore> ArtifactBackend for ConfigMapBackend<S> {
    fn kind(&self) -> Kind {
        Kind::ConfigMap
    }

    fn upsert(&self, rule: &AlertRule, document: &RuleGroupDocument) -> Result<Upserted, ArtifactError> {
        let mut data = BTreeMap::new();
        data.insert(RULE_FILE_KEY.to_string(), encode_rule_file(document));
        let desired = ConfigMap {
            metadata: artifact_meta(rule, &self.identity),
            data,
        };
        upsert_object(self.store.as_ref(), desired)
    }

    fn exists(&self, key: &ObjectKey) -> StateResult<bool> {
        Ok(self.store.get::<ConfigMap>(key)?.is_some())
    }

    fn delete(&self, key: &ObjectKey) -> StateResult<bool> {
        delete_object::<S, ConfigMap>(self.store.as_ref(), key)
    }
}

fn artifact_meta(rule: &AlertRule, identity: &OperatorIdentity) -> ObjectMeta {
    let mut meta = ObjectMeta::new(&rule.metadata.namespace, &rule.metadata.name);
    meta.labels.insert(APP_NAME_LABEL.to_string(), identity.name.clone());
    meta.labels
        .insert(APP_MANAGED_BY_LABEL.to_string(), identity.managed_by.clone());
    meta.labels
        .insert(identity.back_reference_label(), rule.metadata.name.clone());
    meta.owner_references.push(controller_reference(rule));
    meta
}

fn delete_object<S: ObjectStore, R: Resource>(store: &S, key: &ObjectKey) -> StateResult<bool> {
    match store.get::<R>(key)? {
        Some(current) if !current.metadata().is_terminating() => store.delete::<R>(key),
        _ => Ok(false),
    }
}

/// Fetch by key; create when absent, otherwise carry the stored identity
/// and version forward and replace the whole object.
fn upsert_object<S: ObjectStore, R: Resource>(store: &S, mut desired: R) -> Result<Upserted, ArtifactError> {
    let key = desired.key();
    let existing = store.get::<R>(&key).map_err(|source| ArtifactError::Fetch {
        kind: R::KIND,
        key: key.clone(),
        source,
    })?;

    match existing {
        None => {
            store.create(&desired).map_err(|source| ArtifactError::Create {
                kind: R::KIND,
                key: key.clone(),
                source,
            })?;
            info!(kind = %R::KIND, %key, "artifact created");
            Ok(Upserted::Created)
        }
        Some(current) => {
            let current = current.metadata();
            let meta = desired.metadata_mut();
            meta.uid = current.uid.clone();
            meta.resource_version = current.resource_version;
            meta.generation = current.generation;
            meta.creation_timestamp = current.creation_timestamp;
            meta.finalizers = current.finalizers.clone();
            store.replace(&desired).map_err(|source| ArtifactError::Update {
                kind: R::KIND,
                key: key.clone(),
                source,
            })?;
            info!(kind = %R::KIND, %key, "artifact replaced");
            Ok(Upserted::Replaced)
        }
    }
}

/// Render a rule group as the text stored in a ConfigMap.
///
/// ```text
/// groups:
/// - name: <group>
///   rules:
/// - alert: <name>
///   expr: <expr>
///   for: <duration>
///   labels:
///     <key>: "<value>"
///   annotations:
///     <key>: "<value>"
/// ```
///
/// Rule items sit at column zero. Tools reading the file rely on that
/// layout, so it is not normalized. Label and annotation values are always
/// quoted; names, keys and `expr` are written plain unless YAML would read
/// them differently.
pub fn encode_rule_file(document: &RuleGroupDocument) -> String {
    let mut out = String::from("groups:\n");
    for group in &document.groups {
        let _ = writeln!(out, "- name: {}", scalar(&group.name));
        out.push_str("  rules:\n");
        for rule in &group.rules {
            let _ = writeln!(out, "- alert: {}", scalar(&rule.alert));
            let _ = writeln!(out, "  expr: {}", scalar(&rule.expr));
            if let Some(duration) = &rule.for_duration {
                let _ = writeln!(out, "  for: {duration}");
            }
            out.push_str("  labels:\n");
            for (key, value) in &rule.labels {
                let _ = writeln!(out, "    {}: \"{}\"", scalar(key), escape(value));
            }
            if !rule.annotations.is_empty() {
                out.push_str("  annotations:\n");
                for (key, value) in &rule.annotations {
                    let _ = writeln!(out, "    {}: \"{}\"", scalar(key), escape(value));
                }
            }
        }
    }
    out
}

/// Plain if it reads back as the same string, double-quoted otherwise.
fn scalar(value: &str) -> String {
    if is_plain(value) {
        value.to_string()
    } else {
        format!("\"{}\"", escape(value))
    }
}

fn is_plain(value: &str) -> bool {
    let Some(first) = value.chars().next() else {
        return false;
    };
    if first.is_whitespace() || value.ends_with(char::is_whitespace) || value.ends_with(':') {
        return false;
    }
    if "-?:,[]{}#&*!|>'\"%@`".contains(first) {
        return false;
    }
    if value.chars().any(char::is_control) || value.contains(": ") || value.contains(" #") {
        return false;
    }
    if value.parse::<f64>().is_ok() {
        return false;
    }
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "false" | "null" | "~" | "yes" | "no" | "on" | "off"
    )
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertrule_state::{AlertRuleSpec, RuleEntry, RuleGroup, Severity, StateStore};
    use indexmap::IndexMap;

    fn store() -> Arc<StateStore> {
        Arc::new(StateStore::open_in_memory().unwrap())
    }

    fn stored_rule(store: &StateStore) -> AlertRule {
        let rule = AlertRule::new(
            "shop",
            "checkout-alert",
            AlertRuleSpec {
                alert_name: "checkoutPodDown".to_string(),
                expression: "up == 0".to_string(),
                severity: Some(Severity::Critical),
                for_duration: None,
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
                deployment_ref: None,
            },
        );
        store.create(&rule).unwrap()
    }

    fn document(expr: &str) -> RuleGroupDocument {
        let mut labels = IndexMap::new();
        labels.insert("severity".to_string(), "critical".to_string());
        RuleGroupDocument {
            groups: vec![RuleGroup {
                name: "checkout-alert-group".to_string(),
                rules: vec![RuleEntry {
                    alert: "checkoutPodDown".to_string(),
                    expr: expr.to_string(),
                    for_duration: Some("1m".to_string()),
                    labels,
                    annotations: IndexMap::new(),
                }],
            }],
        }
    }

    #[test]
    fn prometheus_rule_create_then_replace_keeps_uid() {
        let store = store();
        let rule = stored_rule(&store);
        let backend = PrometheusRuleBackend::new(store.clone(), OperatorIdentity::default());

        assert_eq!(backend.upsert(&rule, &document("up == 0")).unwrap(), Upserted::Created);
        let key = ObjectKey::new("shop", "checkout-alert");
        let first: PrometheusRule = store.get(&key).unwrap().unwrap();

        assert_eq!(backend.upsert(&rule, &document("up < 1")).unwrap(), Upserted::Replaced);
        let second: PrometheusRule = store.get(&key).unwrap().unwrap();

        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert_eq!(second.spec.groups[0].rules[0].expr, "up < 1");
        assert_eq!(second.metadata.labels["alertrule.monitoring.my.domain"], "checkout-alert");
        assert_eq!(second.metadata.labels[APP_MANAGED_BY_LABEL], "alert-rule-operator");
        let owner = second.metadata.controller_owner().unwrap();
        assert_eq!(owner.kind, Kind::AlertRule);
        assert_eq!(owner.uid, rule.metadata.uid);
    }

    #[test]
    fn config_map_holds_rule_file() {
        let store = store();
        let rule = stored_rule(&store);
        let backend = backend_for(ArtifactFormat::ConfigMap, store.clone(), OperatorIdentity::default());
        assert_eq!(backend.kind(), Kind::ConfigMap);

        backend.upsert(&rule, &document("up == 0")).unwrap();
        let key = ObjectKey::new("shop", "checkout-alert");
        assert!(backend.exists(&key).unwrap());

        let map: ConfigMap = store.get(&key).unwrap().unwrap();
        assert_eq!(
            map.data[RULE_FILE_KEY],
            "groups:\n- name: checkout-alert-group\n  rules:\n- alert: checkoutPodDown\n  expr: up == 0\n  for: 1m\n  labels:\n    severity: \"critical\"\n"
        );
    }

    #[test]
    fn delete_reports_absence() {
        let store = store();
        let rule = stored_rule(&store);
        let backend = PrometheusRuleBackend::new(store, OperatorIdentity::default());
        let key = rule.metadata.key();

        assert!(!backend.delete(&key).unwrap());
        backend.upsert(&rule, &document("up == 0")).unwrap();
        assert!(backend.delete(&key).unwrap());
        assert!(!backend.exists(&key).unwrap());
    }

    #[test]
    fn rule_file_escapes_quotes() {
        let mut doc = document("up == 0");
        doc.groups[0].rules[0].for_duration = None;
        doc.groups[0].rules[0]
            .annotations
            .insert("summary".to_string(), "say \"hi\" \\o/".to_string());
        let text = encode_rule_file(&doc);
        assert!(!text.contains("for:"));
        assert!(text.ends_with("  annotations:\n    summary: \"say \\\"hi\\\" \\\\o/\"\n"));
    }

    #[test]
    fn rule_file_quotes_what_yaml_would_misread() {
        let mut doc = document("sum(rate(errors[5m]))\n  / sum(rate(requests[5m])) > 0.1");
        doc.groups[0].rules[0]
            .labels
            .insert("team: core".to_string(), "payments".to_string());
        doc.groups[0].rules[0].alert = "true".to_string();
        let text = encode_rule_file(&doc);

        assert!(text.contains("- alert: \"true\"\n"));
        assert!(text.contains(
            "  expr: \"sum(rate(errors[5m]))\\n  / sum(rate(requests[5m])) > 0.1\"\n"
        ));
        assert!(text.contains("    \"team: core\": \"payments\"\n"));
        assert!(text.contains("    severity: \"critical\"\n"));
        assert_eq!(text.lines().filter(|line| line.starts_with("  expr:")).count(), 1);
    }

    #[test]
    fn plain_scalars_stay_plain() {
        assert!(is_plain("up{job=\"checkout\"} == 0"));
        assert!(is_plain("rate(http_errors_total[5m]) > 0.1"));
        assert!(is_plain("app.kubernetes.io/managed-by"));
        assert!(!is_plain(""));
        assert!(!is_plain("{job=\"a\"} == 0"));
        assert!(!is_plain("a # b"));
        assert!(!is_plain("42"));
        assert!(!is_plain("Null"));
    }

    #[test]
    fn delete_leaves_pending_removal_alone() {
        let store = store();
        let rule = stored_rule(&store);
        let backend = PrometheusRuleBackend::new(store.clone(), OperatorIdentity::default());
        let key = rule.metadata.key();
        backend.upsert(&rule, &document("up == 0")).unwrap();

        let mut held: PrometheusRule = store.get(&key).unwrap().unwrap();
        held.metadata.finalizers.push("example.com/hold".to_string());
        store.replace(&held).unwrap();

        assert!(backend.delete(&key).unwrap());
        assert!(backend.exists(&key).unwrap());
        assert!(!backend.delete(&key).unwrap());
    }

    #[test]
    fn failure_reasons_name_the_kind() {
        let err = ArtifactError::Create {
            kind: Kind::ConfigMap,
            key: ObjectKey::new("shop", "a"),
            source: StateError::Unavailable("down".to_string()),
        };
        assert_eq!(err.reason(), "ConfigMapCreationFailed");
        assert!(err.is_retryable());

        let err = ArtifactError::Update {
            kind: Kind::PrometheusRule,
            key: ObjectKey::new("shop", "a"),
            source: StateError::Unavailable("down".to_string()),
        };
        assert_eq!(err.reason(), "PrometheusRuleUpdateFailed");
    }
}
