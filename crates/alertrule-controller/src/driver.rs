//! Resync driver.
//!
//! Level-triggered: every pass lists what exists and reconciles each key
//! once. A key that disappeared since the previous pass is reconciled too
//! (that is how deletions are noticed), and a key whose reconcile failed
//! stays queued until a pass succeeds for it. Within a pass, keys run
//! concurrently on the blocking pool; passes never overlap, so one key is
//! never reconciled twice at the same time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use alertrule_core::{ConfigError, OperatorConfig};
use alertrule_state::{AlertRule, Deployment, Kind, ObjectKey, ObjectStore, Resource, StateResult};

use crate::alertrule::AlertRuleReconciler;
use crate::backend::backend_for;
use crate::deployment::DeploymentReconciler;
use crate::error::{Outcome, ReconcileError};
use crate::identity::OperatorIdentity;
use crate::render::RuleRenderer;

/// Result of one pass over both kinds.
#[derive(Debug, Default)]
pub struct PassReport {
    pub outcomes: Vec<(Kind, ObjectKey, Outcome)>,
    pub failures: Vec<(Kind, ObjectKey, ReconcileError)>,
}

impl PassReport {
    pub fn outcome(&self, kind: Kind, key: &ObjectKey) -> Option<Outcome> {
        self.outcomes
            .iter()
            .find(|(k, o, _)| *k == kind && o == key)
            .map(|(_, _, outcome)| *outcome)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keys seen on the last pass plus keys still owed a successful run.
#[derive(Debug, Default)]
struct Queue {
    known: BTreeSet<ObjectKey>,
    pending: BTreeSet<ObjectKey>,
}

impl Queue {
    fn next(&mut self, listed: BTreeSet<ObjectKey>) -> BTreeSet<ObjectKey> {
        let mut keys: BTreeSet<ObjectKey> = listed.union(&self.known).cloned().collect();
        keys.extend(std::mem::take(&mut self.pending));
        self.known = listed;
        keys
    }
}

pub struct Driver<S> {
    store: Arc<S>,
    deployments: Arc<DeploymentReconciler<S>>,
    alert_rules: Arc<AlertRuleReconciler<S>>,
    deployment_queue: Queue,
    alert_rule_queue: Queue,
}

impl<S: ObjectStore> Driver<S> {
    pub fn new(
        store: Arc<S>,
        deployments: DeploymentReconciler<S>,
        alert_rules: AlertRuleReconciler<S>,
    ) -> Self {
        Self {
            store,
            deployments: Arc::new(deployments),
            alert_rules: Arc::new(alert_rules),
            deployment_queue: Queue::default(),
            alert_rule_queue: Queue::default(),
        }
    }

    /// Both reconcilers wired to the configured identity and artifact format.
    pub fn from_config(config: &OperatorConfig, store: Arc<S>) -> Result<Self, ConfigError> {
        let identity = OperatorIdentity::from(config);
        let renderer = RuleRenderer::from_config(config)?;
        let backend = backend_for(config.artifact.format, store.clone(), identity.clone());
        Ok(Self::new(
            store.clone(),
            DeploymentReconciler::new(store.clone(), identity),
            AlertRuleReconciler::new(store, backend, renderer),
        ))
    }

    /// One pass: workloads first, so the AlertRules they create are picked
    /// up by the same pass.
    pub async fn pass(&mut self) -> StateResult<PassReport> {
        let mut report = PassReport::default();

        let listed = listed_keys::<S, Deployment>(&self.store)?;
        let keys = self.deployment_queue.next(listed);
        let reconciler = self.deployments.clone();
        let failed = run_keys(Kind::Deployment, keys, &mut report, move |key| {
            reconciler.reconcile(key)
        })
        .await;
        self.deployment_queue.pending = failed;

        let listed = listed_keys::<S, AlertRule>(&self.store)?;
        let keys = self.alert_rule_queue.next(listed);
        let reconciler = self.alert_rules.clone();
        let failed = run_keys(Kind::AlertRule, keys, &mut report, move |key| {
            reconciler.reconcile(key)
        })
        .await;
        self.alert_rule_queue.pending = failed;

        Ok(report)
    }

    /// Run passes every `interval` until `shutdown` flips.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "resync driver started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.pass().await {
                        Ok(report) if report.is_clean() => {
                            debug!(reconciled = report.outcomes.len(), "resync pass complete");
                        }
                        Ok(report) => {
                            warn!(
                                reconciled = report.outcomes.len(),
                                failed = report.failures.len(),
                                "resync pass finished with failures"
                            );
                        }
                        Err(e) => error!(error = %e, "resync pass failed to list objects"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("resync driver shutting down");
                    break;
                }
            }
        }
    }
}

fn listed_keys<S: ObjectStore, R: Resource>(store: &S) -> StateResult<BTreeSet<ObjectKey>> {
    Ok(store.list::<R>(None)?.iter().map(Resource::key).collect())
}

/// Reconcile every key concurrently; returns the keys that failed.
async fn run_keys<F>(
    kind: Kind,
    keys: BTreeSet<ObjectKey>,
    report: &mut PassReport,
    reconcile: F,
) -> BTreeSet<ObjectKey>
where
    F: Fn(&ObjectKey) -> Result<Outcome, ReconcileError> + Clone + Send + 'static,
{
    let mut set = JoinSet::new();
    // Keys still owed a result; whatever is left after draining panicked.
    let mut outstanding = keys.clone();
    for key in keys {
        let reconcile = reconcile.clone();
        set.spawn_blocking(move || {
            let result = reconcile(&key);
            (key, result)
        });
    }

    let mut failed = BTreeSet::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((key, Ok(outcome))) => {
                debug!(%kind, %key, ?outcome, "reconciled");
                outstanding.remove(&key);
                report.outcomes.push((kind, key, outcome));
            }
            Ok((key, Err(err))) => {
                warn!(%kind, %key, error = %err, retryable = err.is_retryable(), "reconcile failed");
                outstanding.remove(&key);
                failed.insert(key.clone());
                report.failures.push((kind, key, err));
            }
            Err(join_err) => {
                error!(%kind, error = %join_err, "reconcile task panicked");
            }
        }
    }
    failed.extend(outstanding);
    failed
}
