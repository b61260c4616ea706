//! Reconcile outcomes and errors.

use thiserror::Error;

use alertrule_state::{Kind, ObjectKey, StateError};

use crate::backend::ArtifactError;
use crate::render::RenderError;

/// What a successful reconcile pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A dependent object was created.
    Created,
    /// A dependent object was rewritten.
    Updated,
    /// Everything already matched.
    Unchanged,
    /// The source was gone and its dependent was deleted.
    Deleted,
    /// The source was gone and so was its dependent.
    Absent,
    /// The source is being deleted; cascade removal takes it from here.
    Terminating,
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to fetch {kind} {key}: {source}")]
    Fetch {
        kind: Kind,
        key: ObjectKey,
        #[source]
        source: StateError,
    },

    #[error("failed to render rules for {key}: {source}")]
    Render {
        key: ObjectKey,
        #[source]
        source: RenderError,
    },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("failed to write status of {key}: {source}")]
    Status {
        key: ObjectKey,
        #[source]
        source: StateError,
    },

    #[error("failed to {action} {kind} {key}: {source}")]
    Write {
        action: &'static str,
        kind: Kind,
        key: ObjectKey,
        #[source]
        source: StateError,
    },
}

impl ReconcileError {
    /// Render failures are fixed by editing the spec, not by waiting.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Render { .. } => false,
            ReconcileError::Artifact(err) => err.is_retryable(),
            ReconcileError::Fetch { source, .. }
            | ReconcileError::Status { source, .. }
            | ReconcileError::Write { source, .. } => source.is_retryable(),
        }
    }
}
