//! Alert rule operator reconcilers.
//!
//! Two level-triggered control loops run against an [`ObjectStore`]:
//!
//! - **`deployment`** — every workload gets a default `<name>-alert`
//!   AlertRule whose back-reference is kept current.
//! - **`alertrule`** — every AlertRule is rendered into a rule group and
//!   stored as an artifact (`PrometheusRule` or `ConfigMap`), with the
//!   outcome reported through status conditions.
//!
//! # Components
//!
//! - **`render`** — pure spec → rule-group translation and label merging
//! - **`backend`** — artifact kinds behind one trait
//! - **`conditions`** — status condition upsert
//! - **`driver`** — periodic resync over both kinds
//!
//! [`ObjectStore`]: alertrule_state::ObjectStore

pub mod alertrule;
pub mod backend;
pub mod conditions;
pub mod deployment;
pub mod driver;
pub mod error;
pub mod identity;
pub mod render;

pub use alertrule::AlertRuleReconciler;
pub use backend::{
    ArtifactBackend, ArtifactError, ConfigMapBackend, PrometheusRuleBackend, Upserted, backend_for,
    encode_rule_file,
};
pub use conditions::ConditionUpdate;
pub use deployment::DeploymentReconciler;
pub use driver::{Driver, PassReport};
pub use error::{Outcome, ReconcileError, ReconcileResult};
pub use identity::OperatorIdentity;
pub use render::{RenderError, RuleRenderer};
