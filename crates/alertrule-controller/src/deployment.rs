//! DeploymentReconciler — one default AlertRule per workload.
//!
//! ```text
//! NoAlertRule ──create──▶ RefCurrent ──drift──▶ RefStale ──update ref──▶ RefCurrent
//!      any ──workload deleted──▶ Absent
//! ```
//!
//! Once the AlertRule exists, only its back-reference to the workload is
//! maintained. Severity, expression, duration, labels and annotations
//! belong to whoever edits the rule afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use alertrule_state::{
    AlertRule, AlertRuleShape, AlertRuleSpec, Deployment, DeploymentReference, Kind, ObjectKey,
    ObjectStore, Severity,
};

use crate::error::{Outcome, ReconcileError, ReconcileResult};
use crate::identity::{
    MANAGED_BY_LABEL, OperatorIdentity, alert_rule_key, controller_reference, default_alert_name,
};

const APP_LABEL: &str = "app";
const DEPLOYMENT_NAME_LABEL: &str = "deployment.kubernetes.io/name";

pub struct DeploymentReconciler<S> {
    store: Arc<S>,
    identity: OperatorIdentity,
}

impl<S: ObjectStore> DeploymentReconciler<S> {
    pub fn new(store: Arc<S>, identity: OperatorIdentity) -> Self {
        Self { store, identity }
    }

    pub fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Outcome> {
        let rule_key = alert_rule_key(key);
        let deployment = self
            .store
            .get::<Deployment>(key)
            .map_err(|source| ReconcileError::Fetch {
                kind: Kind::Deployment,
                key: key.clone(),
                source,
            })?;

        let Some(deployment) = deployment else {
            let deleted = self
                .store
                .delete::<AlertRule>(&rule_key)
                .map_err(|source| ReconcileError::Write {
                    action: "delete",
                    kind: Kind::AlertRule,
                    key: rule_key.clone(),
                    source,
                })?;
            return if deleted {
                info!(deployment = %key, alertrule = %rule_key, "deployment gone, alert rule deleted");
                Ok(Outcome::Deleted)
            } else {
                debug!(deployment = %key, "deployment gone, no alert rule");
                Ok(Outcome::Absent)
            };
        };

        if deployment.metadata.is_terminating() {
            debug!(deployment = %key, "deployment terminating, nothing to do");
            return Ok(Outcome::Terminating);
        }

        let existing = self
            .store
            .get::<AlertRule>(&rule_key)
            .map_err(|source| ReconcileError::Fetch {
                kind: Kind::AlertRule,
                key: rule_key.clone(),
                source,
            })?;

        match existing {
            None => {
                let rule = self.default_rule(&deployment);
                self.store
                    .create(&rule)
                    .map_err(|source| ReconcileError::Write {
                        action: "create",
                        kind: Kind::AlertRule,
                        key: rule_key.clone(),
                        source,
                    })?;
                info!(deployment = %key, alertrule = %rule_key, "default alert rule created");
                Ok(Outcome::Created)
            }
            Some(mut rule) => {
                if !sync_back_reference(&mut rule.spec, key) {
                    debug!(deployment = %key, alertrule = %rule_key, "back-reference current");
                    return Ok(Outcome::Unchanged);
                }
                self.store
                    .replace(&rule)
                    .map_err(|source| ReconcileError::Write {
                        action: "update",
                        kind: Kind::AlertRule,
                        key: rule_key.clone(),
                        source,
                    })?;
                info!(deployment = %key, alertrule = %rule_key, "back-reference updated");
                Ok(Outcome::Updated)
            }
        }
    }

    fn default_rule(&self, deployment: &Deployment) -> AlertRule {
        let namespace = &deployment.metadata.namespace;
        let workload = &deployment.metadata.name;

        let mut labels = BTreeMap::new();
        labels.insert("deployment".to_string(), workload.clone());
        labels.insert("namespace".to_string(), namespace.clone());

        let mut annotations = BTreeMap::new();
        annotations.insert("summary".to_string(), format!("Pod {workload} is down"));
        annotations.insert(
            "description".to_string(),
            format!("Pod {workload} in namespace {namespace} has been down for more than 1 minute"),
        );

        let spec = AlertRuleSpec {
            alert_name: default_alert_name(workload),
            expression: format!("up{{job=\"{workload}\"}} == 0"),
            severity: Some(Severity::Critical),
            for_duration: Some("1m".to_string()),
            labels,
            annotations,
            deployment_ref: Some(DeploymentReference {
                namespace: namespace.clone(),
                name: workload.clone(),
            }),
        };

        let key = alert_rule_key(&deployment.metadata.key());
        let mut rule = AlertRule::new(&key.namespace, &key.name, spec);
        let meta = &mut rule.metadata;
        meta.labels.insert(APP_LABEL.to_string(), workload.clone());
        meta.labels
            .insert(MANAGED_BY_LABEL.to_string(), self.identity.managed_by.clone());
        meta.labels
            .insert(DEPLOYMENT_NAME_LABEL.to_string(), workload.clone());
        meta.owner_references.push(controller_reference(deployment));
        rule
    }
}

/// Point the spec back at `workload`. Returns whether anything changed.
fn sync_back_reference(spec: &mut AlertRuleShape, workload: &ObjectKey) -> bool {
    match spec {
        AlertRuleShape::Fixed(spec) => {
            let desired = DeploymentReference {
                namespace: workload.namespace.clone(),
                name: workload.name.clone(),
            };
            if spec.deployment_ref.as_ref() == Some(&desired) {
                return false;
            }
            spec.deployment_ref = Some(desired);
            true
        }
        AlertRuleShape::List(spec) => {
            if spec.target_deployment == workload.name {
                return false;
            }
            spec.target_deployment = workload.name.clone();
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::is_controlled_by;
    use alertrule_state::{RuleDefinition, RuleListSpec, StateStore};

    fn setup() -> (Arc<StateStore>, DeploymentReconciler<StateStore>, ObjectKey) {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store.create(&Deployment::new("shop", "checkout")).unwrap();
        let reconciler = DeploymentReconciler::new(store.clone(), OperatorIdentity::default());
        (store, reconciler, ObjectKey::new("shop", "checkout"))
    }

    fn rule_key() -> ObjectKey {
        ObjectKey::new("shop", "checkout-alert")
    }

    #[test]
    fn creates_default_rule() {
        let (store, reconciler, key) = setup();
        assert_eq!(reconciler.reconcile(&key).unwrap(), Outcome::Created);

        let rule: AlertRule = store.get(&rule_key()).unwrap().unwrap();
        let spec = rule.spec.as_fixed().unwrap();
        assert_eq!(spec.alert_name, "checkoutPodDown");
        assert_eq!(spec.expression, "up{job=\"checkout\"} == 0");
        assert_eq!(spec.for_duration.as_deref(), Some("1m"));
        assert_eq!(spec.severity, Some(Severity::Critical));
        assert_eq!(spec.labels["namespace"], "shop");
        assert_eq!(spec.annotations["summary"], "Pod checkout is down");
        assert_eq!(
            spec.annotations["description"],
            "Pod checkout in namespace shop has been down for more than 1 minute"
        );
        assert_eq!(rule.spec.deployment_name(), Some("checkout"));

        assert_eq!(rule.metadata.labels["app"], "checkout");
        assert_eq!(rule.metadata.labels["managed-by"], "alert-rule-operator");
        assert_eq!(rule.metadata.labels["deployment.kubernetes.io/name"], "checkout");
        let deployment: Deployment = store.get(&key).unwrap().unwrap();
        assert!(is_controlled_by(&rule.metadata, &deployment));
    }

    #[test]
    fn second_pass_is_unchanged() {
        let (store, reconciler, key) = setup();
        reconciler.reconcile(&key).unwrap();
        let before: AlertRule = store.get(&rule_key()).unwrap().unwrap();

        assert_eq!(reconciler.reconcile(&key).unwrap(), Outcome::Unchanged);
        let after: AlertRule = store.get(&rule_key()).unwrap().unwrap();
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
    }

    #[test]
    fn stale_reference_is_repaired_without_touching_rule_content() {
        let (store, reconciler, key) = setup();
        reconciler.reconcile(&key).unwrap();

        let stale_refs = [("shop", "old-checkout"), ("staging", "checkout")];
        for (namespace, name) in stale_refs {
            let mut rule: AlertRule = store.get(&rule_key()).unwrap().unwrap();
            if let AlertRuleShape::Fixed(spec) = &mut rule.spec {
                spec.severity = Some(Severity::Warning);
                spec.expression = "up{job=\"checkout\"} < 1".to_string();
                spec.labels.insert("team".to_string(), "payments".to_string());
                spec.annotations
                    .insert("runbook".to_string(), "https://runbooks.example/checkout".to_string());
                spec.deployment_ref = Some(DeploymentReference {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
            let edited = store.replace(&rule).unwrap();
            let edited = edited.spec.as_fixed().unwrap().clone();

            assert_eq!(reconciler.reconcile(&key).unwrap(), Outcome::Updated);
            let rule: AlertRule = store.get(&rule_key()).unwrap().unwrap();
            let spec = rule.spec.as_fixed().unwrap();
            assert_eq!(
                spec.deployment_ref,
                Some(DeploymentReference {
                    namespace: "shop".to_string(),
                    name: "checkout".to_string(),
                })
            );
            assert_eq!(spec.severity, edited.severity);
            assert_eq!(spec.expression, edited.expression);
            assert_eq!(spec.for_duration, edited.for_duration);
            assert_eq!(spec.labels, edited.labels);
            assert_eq!(spec.annotations, edited.annotations);
            assert_eq!(spec.labels["team"], "payments");
        }
    }

    #[test]
    fn list_shape_target_is_repaired() {
        let (store, reconciler, key) = setup();
        let list = RuleListSpec {
            rules: vec![RuleDefinition {
                name: "HighErrorRate".to_string(),
                condition: "rate(errors[5m]) > 0.1".to_string(),
                duration: "5m".to_string(),
                severity: Severity::Warning,
                notifications: vec![],
            }],
            target_deployment: "elsewhere".to_string(),
        };
        store.create(&AlertRule::new("shop", "checkout-alert", list)).unwrap();

        assert_eq!(reconciler.reconcile(&key).unwrap(), Outcome::Updated);
        let rule: AlertRule = store.get(&rule_key()).unwrap().unwrap();
        match &rule.spec {
            AlertRuleShape::List(spec) => {
                assert_eq!(spec.target_deployment, "checkout");
                assert_eq!(spec.rules[0].severity, Severity::Warning);
            }
            AlertRuleShape::Fixed(_) => panic!("shape changed"),
        }
    }

    #[test]
    fn missing_workload_deletes_rule_and_tolerates_absence() {
        let (store, reconciler, key) = setup();
        reconciler.reconcile(&key).unwrap();

        // Drop the owner reference so the workload delete does not cascade.
        let mut rule: AlertRule = store.get(&rule_key()).unwrap().unwrap();
        rule.metadata.owner_references.clear();
        store.replace(&rule).unwrap();
        store.delete::<Deployment>(&key).unwrap();

        assert_eq!(reconciler.reconcile(&key).unwrap(), Outcome::Deleted);
        assert!(store.get::<AlertRule>(&rule_key()).unwrap().is_none());
        assert_eq!(reconciler.reconcile(&key).unwrap(), Outcome::Absent);
    }

    #[test]
    fn terminating_workload_is_left_alone() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut deployment = Deployment::new("shop", "checkout");
        deployment.metadata.finalizers.push("example.com/drain".to_string());
        store.create(&deployment).unwrap();
        let key = ObjectKey::new("shop", "checkout");
        store.delete::<Deployment>(&key).unwrap();

        let reconciler = DeploymentReconciler::new(store.clone(), OperatorIdentity::default());
        assert_eq!(reconciler.reconcile(&key).unwrap(), Outcome::Terminating);
        assert!(store.get::<AlertRule>(&rule_key()).unwrap().is_none());
    }
}
