//! alertrule-state — the object store the reconcilers run against.
//!
//! Backed by [redb](https://docs.rs/redb), it plays the role of the
//! orchestration platform's API server: namespaced, versioned objects with
//! optimistic concurrency, a status subresource, finalizer-driven deletion
//! timestamps, and owner-reference cascade deletion.
//!
//! # Architecture
//!
//! Objects are JSON-serialized into a single `objects` table keyed
//! `{kind}/{namespace}/{name}`. A second `owners` table is a reverse index
//! `{owner uid}|{dependent key}` maintained in the same write transaction
//! as the object itself, so a delete can find and remove dependents without
//! a scan over every object.
//!
//! Reconcilers only see the [`ObjectStore`] trait; [`StateStore`] is the
//! production implementation and its in-memory backend is what tests use.

pub mod error;
pub mod meta;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use meta::{Kind, ObjectKey, ObjectMeta, OwnerReference, Resource};
pub use store::{ObjectStore, StateStore};
pub use types::*;
