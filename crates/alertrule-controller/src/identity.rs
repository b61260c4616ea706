//! Canonical names, labels, and owner references shared by both loops.

use alertrule_core::OperatorConfig;
use alertrule_state::{ObjectKey, ObjectMeta, OwnerReference, Resource};

/// Key under which the config-map artifact stores its rule file.
pub const RULE_FILE_KEY: &str = "alertrules.yaml";

/// Label carrying the operator identity marker on rendered rules and on
/// AlertRules the operator creates.
pub const MANAGED_BY_LABEL: &str = "managed-by";

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Who this operator is, as stamped into everything it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorIdentity {
    /// `app.kubernetes.io/name` value.
    pub name: String,
    /// Identity marker (`managed-by`).
    pub managed_by: String,
    /// API domain used for the `alertrule.<domain>` label.
    pub domain: String,
}

impl Default for OperatorIdentity {
    fn default() -> Self {
        Self::from(&OperatorConfig::default())
    }
}

impl From<&OperatorConfig> for OperatorIdentity {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            name: config.operator.name.clone(),
            managed_by: config.operator.identity.clone(),
            domain: config.operator.domain.clone(),
        }
    }
}

impl OperatorIdentity {
    /// `alertrule.<domain>`, the artifact label naming its AlertRule.
    pub fn back_reference_label(&self) -> String {
        format!("alertrule.{}", self.domain)
    }
}

/// AlertRule derived from a workload.
pub fn alert_rule_name(workload: &str) -> String {
    format!("{workload}-alert")
}

pub fn alert_rule_key(workload: &ObjectKey) -> ObjectKey {
    ObjectKey::new(&workload.namespace, alert_rule_name(&workload.name))
}

/// Alert name of the default rule synthesized for a workload.
pub fn default_alert_name(workload: &str) -> String {
    format!("{workload}PodDown")
}

/// Rule-group name for a single-rule AlertRule.
pub fn group_name(alert_rule: &str) -> String {
    format!("{alert_rule}-group")
}

/// Reference marking `owner` as the managing controller of a dependent.
pub fn controller_reference<R: Resource>(owner: &R) -> OwnerReference {
    let meta = owner.metadata();
    OwnerReference {
        api_version: R::KIND.api_version().to_string(),
        kind: R::KIND,
        name: meta.name.clone(),
        uid: meta.uid.clone(),
        controller: true,
        block_owner_deletion: true,
    }
}

pub fn is_controlled_by<R: Resource>(meta: &ObjectMeta, owner: &R) -> bool {
    meta.controller_owner()
        .is_some_and(|r| r.kind == R::KIND && r.uid == owner.metadata().uid)
}
