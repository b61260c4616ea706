//! AlertRuleReconciler — keeps each AlertRule's artifact and status current.
//!
//! ```text
//! AlertRule absent       → delete same-name artifact     → Deleted | Absent
//! deletion in progress   → nothing (cascade GC)          → Terminating
//! otherwise              → Progressing → render → upsert → observe → status
//! ```
//!
//! Every failure after the AlertRule is fetched is written to its
//! `Degraded` condition before the error is returned.

use std::sync::Arc;

use tracing::{debug, info, warn};

use alertrule_state::{AlertRule, Condition, ConditionStatus, Kind, ObjectKey, ObjectStore};

use crate::backend::{ArtifactBackend, Upserted};
use crate::conditions::{self, AVAILABLE, ConditionUpdate, DEGRADED, PROGRESSING, READY, reason};
use crate::error::{Outcome, ReconcileError, ReconcileResult};
use crate::render::RuleRenderer;

pub struct AlertRuleReconciler<S> {
    store: Arc<S>,
    backend: Box<dyn ArtifactBackend>,
    renderer: RuleRenderer,
}

impl<S: ObjectStore> AlertRuleReconciler<S> {
    pub fn new(store: Arc<S>, backend: Box<dyn ArtifactBackend>, renderer: RuleRenderer) -> Self {
        Self {
            store,
            backend,
            renderer,
        }
    }

    pub fn artifact_kind(&self) -> Kind {
        self.backend.kind()
    }

    pub fn reconcile(&self, key: &ObjectKey) -> ReconcileResult<Outcome> {
        let fetched = self
            .store
            .get::<AlertRule>(key)
            .map_err(|source| ReconcileError::Fetch {
                kind: Kind::AlertRule,
                key: key.clone(),
                source,
            })?;

        let Some(mut rule) = fetched else {
            return self.remove_orphan(key);
        };

        if rule.metadata.is_terminating() {
            debug!(alertrule = %key, "alert rule terminating, nothing to do");
            return Ok(Outcome::Terminating);
        }

        let generation = rule.metadata.generation;
        let kind = self.backend.kind();
        let mut conditions = std::mem::take(&mut rule.status.conditions);
        conditions::upsert(
            &mut conditions,
            ConditionUpdate::new(
                PROGRESSING,
                ConditionStatus::True,
                reason::RECONCILING,
                "Reconciling AlertRule",
            ),
            generation,
        );

        let document = match self.renderer.render(&key.name, &rule.spec) {
            Ok(document) => document,
            Err(source) => {
                warn!(alertrule = %key, error = %source, "rule generation failed");
                conditions::upsert(
                    &mut conditions,
                    ConditionUpdate::new(
                        DEGRADED,
                        ConditionStatus::True,
                        reason::GENERATION_FAILED,
                        format!("Failed to generate alert rules: {source}"),
                    ),
                    generation,
                );
                self.write_status_best_effort(rule, conditions);
                return Err(ReconcileError::Render {
                    key: key.clone(),
                    source,
                });
            }
        };

        let upserted = match self.backend.upsert(&rule, &document) {
            Ok(upserted) => upserted,
            Err(err) => {
                warn!(alertrule = %key, %kind, error = %err, "artifact upsert failed");
                conditions::upsert(
                    &mut conditions,
                    ConditionUpdate::new(
                        DEGRADED,
                        ConditionStatus::True,
                        err.reason(),
                        err.to_string(),
                    ),
                    generation,
                );
                self.write_status_best_effort(rule, conditions);
                return Err(err.into());
            }
        };

        let ready = match self.backend.exists(key) {
            Ok(true) => ConditionUpdate::new(
                READY,
                ConditionStatus::True,
                format!("{kind}Created"),
                format!("{kind} {} exists", key.name),
            ),
            Ok(false) => ConditionUpdate::new(
                READY,
                ConditionStatus::False,
                format!("{kind}NotFound"),
                format!("{kind} {} not found", key.name),
            ),
            Err(source) => {
                warn!(alertrule = %key, %kind, error = %source, "artifact check failed");
                let message = format!("Failed to check {kind}: {source}");
                for r#type in [READY, AVAILABLE] {
                    conditions::upsert(
                        &mut conditions,
                        ConditionUpdate::new(r#type, ConditionStatus::Unknown, reason::ERROR, message.clone()),
                        generation,
                    );
                }
                self.write_status_best_effort(rule, conditions);
                return Err(ReconcileError::Fetch {
                    kind,
                    key: key.clone(),
                    source,
                });
            }
        };
        let available = if ready.status == ConditionStatus::True {
            ConditionUpdate::new(
                AVAILABLE,
                ConditionStatus::True,
                reason::RECONCILED,
                format!("AlertRule reconciled successfully. {kind}: {}", key.name),
            )
        } else {
            ConditionUpdate::new(AVAILABLE, ready.status, ready.reason.clone(), ready.message.clone())
        };

        for update in [
            ready,
            available,
            ConditionUpdate::new(
                PROGRESSING,
                ConditionStatus::False,
                reason::RECONCILED,
                "Reconciliation complete",
            ),
            ConditionUpdate::new(DEGRADED, ConditionStatus::False, reason::RECONCILED, ""),
        ] {
            conditions::upsert(&mut conditions, update, generation);
        }

        rule.status.conditions = conditions;
        self.store
            .replace_status(&rule)
            .map_err(|source| ReconcileError::Status {
                key: key.clone(),
                source,
            })?;

        info!(alertrule = %key, %kind, ?upserted, "alert rule reconciled");
        Ok(match upserted {
            Upserted::Created => Outcome::Created,
            Upserted::Replaced => Outcome::Updated,
        })
    }

    fn remove_orphan(&self, key: &ObjectKey) -> ReconcileResult<Outcome> {
        let kind = self.backend.kind();
        let deleted = self
            .backend
            .delete(key)
            .map_err(|source| ReconcileError::Write {
                action: "delete",
                kind,
                key: key.clone(),
                source,
            })?;
        if deleted {
            info!(alertrule = %key, %kind, "alert rule gone, artifact deleted");
            Ok(Outcome::Deleted)
        } else {
            debug!(alertrule = %key, %kind, "alert rule gone, no artifact");
            Ok(Outcome::Absent)
        }
    }

    /// The primary error is what the caller sees; a failed status write on
    /// the way out is only logged.
    fn write_status_best_effort(&self, mut rule: AlertRule, conditions: Vec<Condition>) {
        rule.status.conditions = conditions;
        if let Err(err) = self.store.replace_status(&rule) {
            warn!(alertrule = %rule.metadata.key(), error = %err, "status update failed");
        }
    }
}
