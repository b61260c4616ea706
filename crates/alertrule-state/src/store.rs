//! StateStore — redb-backed object store.
//!
//! Implements the platform contract the reconcilers rely on:
//!
//! - every write bumps a store-wide revision that becomes the object's
//!   `resource_version`;
//! - `replace` and `replace_status` require the caller's version to match
//!   the stored one, otherwise they fail with [`StateError::Conflict`];
//! - `generation` only moves when content outside `metadata` and `status`
//!   changes;
//! - deleting an object with finalizers only stamps `deletion_timestamp`;
//!   deleting without finalizers removes it and, through the `owners`
//!   index, every dependent that names it as owner.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::meta::{Kind, ObjectKey, ObjectMeta, Resource};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Access to namespaced, versioned objects.
///
/// Reads treat absence as a normal outcome (`Ok(None)` / `Ok(false)`).
/// Writes are synchronous and may fail transiently; callers should
/// propagate those failures so the caller's scheduler retries.
pub trait ObjectStore: Send + Sync + 'static {
    fn get<R: Resource>(&self, key: &ObjectKey) -> StateResult<Option<R>>;

    /// List objects of one kind, optionally restricted to a namespace.
    fn list<R: Resource>(&self, namespace: Option<&str>) -> StateResult<Vec<R>>;

    /// Create a new object. Fails with `AlreadyExists` if the key is taken.
    fn create<R: Resource>(&self, object: &R) -> StateResult<R>;

    /// Replace an existing object. The object's `resource_version` must
    /// match the stored one.
    fn replace<R: Resource>(&self, object: &R) -> StateResult<R>;

    /// Write only the status of an existing object, under the same version
    /// check as `replace`.
    fn replace_status<R: Resource>(&self, object: &R) -> StateResult<R>;

    /// Delete an object. Returns false if it did not exist.
    fn delete<R: Resource>(&self, key: &ObjectKey) -> StateResult<bool>;
}

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

fn storage_key(kind: Kind, key: &ObjectKey) -> String {
    format!("{}/{}/{}", kind.as_str(), key.namespace, key.name)
}

fn owner_index_key(owner_uid: &str, dependent: &str) -> String {
    format!("{owner_uid}|{dependent}")
}

fn meta_of(value: &Value) -> StateResult<ObjectMeta> {
    let meta = value
        .get("metadata")
        .cloned()
        .ok_or_else(|| StateError::Deserialize("object has no metadata".to_string()))?;
    serde_json::from_value(meta).map_err(map_err!(Deserialize))
}

fn set_meta(value: &mut Value, meta: &ObjectMeta) -> StateResult<()> {
    let meta = serde_json::to_value(meta).map_err(map_err!(Serialize))?;
    match value.as_object_mut() {
        Some(obj) => {
            obj.insert("metadata".to_string(), meta);
            Ok(())
        }
        None => Err(StateError::Invalid("object is not a JSON map".to_string())),
    }
}

/// Content that drives `generation`: everything except metadata and status.
fn content_of(value: &Value) -> Value {
    let mut content = value.clone();
    if let Some(obj) = content.as_object_mut() {
        obj.remove("metadata");
        obj.remove("status");
    }
    content
}

fn validate_identity(key: &ObjectKey) -> StateResult<()> {
    if key.namespace.is_empty() || key.name.is_empty() {
        return Err(StateError::Invalid(format!(
            "namespace and name are required (got {key:?})"
        )));
    }
    if key.namespace.contains('/') || key.name.contains('/') || key.name.contains('|') {
        return Err(StateError::Invalid(format!("illegal character in {key}")));
    }
    Ok(())
}

/// Tables opened for the lifetime of one write transaction.
struct WriteScope<'txn> {
    objects: Table<'txn, &'static str, &'static [u8]>,
    owners: Table<'txn, &'static str, &'static str>,
    counters: Table<'txn, &'static str, u64>,
    now: DateTime<Utc>,
}

impl<'txn> WriteScope<'txn> {
    fn open(txn: &'txn WriteTransaction) -> StateResult<Self> {
        Ok(Self {
            objects: txn.open_table(OBJECTS).map_err(map_err!(Table))?,
            owners: txn.open_table(OWNERS).map_err(map_err!(Table))?,
            counters: txn.open_table(COUNTERS).map_err(map_err!(Table))?,
            now: Utc::now(),
        })
    }

    fn next_revision(&mut self) -> StateResult<u64> {
        let current = self
            .counters
            .get(REVISION_KEY)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        self.counters
            .insert(REVISION_KEY, next)
            .map_err(map_err!(Write))?;
        Ok(next)
    }

    fn read(&self, skey: &str) -> StateResult<Option<Value>> {
        match self.objects.get(skey).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn write(&mut self, skey: &str, value: &Value) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        self.objects
            .insert(skey, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn index_owners(&mut self, skey: &str, meta: &ObjectMeta) -> StateResult<()> {
        for owner in &meta.owner_references {
            let ikey = owner_index_key(&owner.uid, skey);
            self.owners
                .insert(ikey.as_str(), skey)
                .map_err(map_err!(Write))?;
        }
        Ok(())
    }

    fn unindex_owners(&mut self, skey: &str, meta: &ObjectMeta) -> StateResult<()> {
        for owner in &meta.owner_references {
            let ikey = owner_index_key(&owner.uid, skey);
            self.owners.remove(ikey.as_str()).map_err(map_err!(Write))?;
        }
        Ok(())
    }

    fn dependents_of(&self, owner_uid: &str) -> StateResult<Vec<String>> {
        let prefix = format!("{owner_uid}|");
        let mut dependents = Vec::new();
        for entry in self.owners.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                dependents.push(value.value().to_string());
            }
        }
        Ok(dependents)
    }

    /// Request deletion of `skey`. Objects with finalizers are only marked;
    /// everything else is removed together with its dependents.
    fn delete(&mut self, skey: &str) -> StateResult<bool> {
        let Some(mut value) = self.read(skey)? else {
            return Ok(false);
        };
        let mut meta = meta_of(&value)?;

        if !meta.finalizers.is_empty() {
            if meta.deletion_timestamp.is_none() {
                meta.deletion_timestamp = Some(self.now);
                meta.resource_version = self.next_revision()?;
                set_meta(&mut value, &meta)?;
                self.write(skey, &value)?;
                debug!(key = %skey, "deletion pending on finalizers");
            }
            return Ok(true);
        }

        self.remove(skey, &meta)?;
        Ok(true)
    }

    fn remove(&mut self, skey: &str, meta: &ObjectMeta) -> StateResult<()> {
        self.objects.remove(skey).map_err(map_err!(Write))?;
        self.unindex_owners(skey, meta)?;
        debug!(key = %skey, "object removed");

        if meta.uid.is_empty() {
            return Ok(());
        }
        for dependent in self.dependents_of(&meta.uid)? {
            debug!(owner = %skey, dependent = %dependent, "cascading delete");
            self.delete(&dependent)?;
            // Dependents held back by finalizers keep their index entry
            // until they go; drop the one pointing at this owner now.
            let ikey = owner_index_key(&meta.uid, &dependent);
            self.owners.remove(ikey.as_str()).map_err(map_err!(Write))?;
        }
        Ok(())
    }
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.open_table(OWNERS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Cheap liveness probe: can a read transaction be opened?
    pub fn ping(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        Ok(())
    }

    /// Run `f` inside one write transaction; commit only if it succeeds.
    fn write_txn<T>(&self, f: impl FnOnce(&mut WriteScope<'_>) -> StateResult<T>) -> StateResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let out = {
            let mut scope = WriteScope::open(&txn)?;
            f(&mut scope)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(out)
    }
}

impl ObjectStore for StateStore {
    fn get<R: Resource>(&self, key: &ObjectKey) -> StateResult<Option<R>> {
        let skey = storage_key(R::KIND, key);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        match table.get(skey.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let object: R =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(object))
            }
            None => Ok(None),
        }
    }

    fn list<R: Resource>(&self, namespace: Option<&str>) -> StateResult<Vec<R>> {
        let prefix = match namespace {
            Some(ns) => format!("{}/{}/", R::KIND.as_str(), ns),
            None => format!("{}/", R::KIND.as_str()),
        };
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let object: R =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(object);
            }
        }
        Ok(results)
    }

    fn create<R: Resource>(&self, object: &R) -> StateResult<R> {
        let key = object.key();
        validate_identity(&key)?;
        let skey = storage_key(R::KIND, &key);

        let value = self.write_txn(|scope| {
            if scope.read(&skey)?.is_some() {
                return Err(StateError::AlreadyExists(format!("{} {key}", R::KIND)));
            }
            let mut meta = object.metadata().clone();
            meta.uid = Uuid::new_v4().to_string();
            meta.resource_version = scope.next_revision()?;
            meta.generation = 1;
            meta.creation_timestamp = Some(scope.now);
            meta.deletion_timestamp = None;

            let mut value = serde_json::to_value(object).map_err(map_err!(Serialize))?;
            if R::HAS_STATUS {
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("status");
                }
            }
            set_meta(&mut value, &meta)?;
            scope.write(&skey, &value)?;
            scope.index_owners(&skey, &meta)?;
            Ok(value)
        })?;

        debug!(kind = %R::KIND, %key, "object created");
        serde_json::from_value(value).map_err(map_err!(Deserialize))
    }

    fn replace<R: Resource>(&self, object: &R) -> StateResult<R> {
        let key = object.key();
        let skey = storage_key(R::KIND, &key);

        let value = self.write_txn(|scope| {
            let current = scope
                .read(&skey)?
                .ok_or_else(|| StateError::NotFound(format!("{} {key}", R::KIND)))?;
            let current_meta = meta_of(&current)?;
            let expected = object.metadata().resource_version;
            if expected != current_meta.resource_version {
                return Err(StateError::Conflict {
                    key: skey.clone(),
                    expected,
                    actual: current_meta.resource_version,
                });
            }

            let mut value = serde_json::to_value(object).map_err(map_err!(Serialize))?;
            if R::HAS_STATUS {
                if let Some(obj) = value.as_object_mut() {
                    match current.get("status") {
                        Some(status) => obj.insert("status".to_string(), status.clone()),
                        None => obj.remove("status"),
                    };
                }
            }

            let mut meta = object.metadata().clone();
            meta.uid = current_meta.uid.clone();
            meta.creation_timestamp = current_meta.creation_timestamp;
            meta.deletion_timestamp = current_meta.deletion_timestamp;
            meta.generation = if content_of(&value) == content_of(&current) {
                current_meta.generation
            } else {
                current_meta.generation + 1
            };
            meta.resource_version = scope.next_revision()?;
            set_meta(&mut value, &meta)?;

            scope.unindex_owners(&skey, &current_meta)?;
            scope.write(&skey, &value)?;
            scope.index_owners(&skey, &meta)?;

            // Last finalizer removed from a terminating object: finish the delete.
            if meta.deletion_timestamp.is_some() && meta.finalizers.is_empty() {
                scope.remove(&skey, &meta)?;
            }
            Ok(value)
        })?;

        debug!(kind = %R::KIND, %key, "object replaced");
        serde_json::from_value(value).map_err(map_err!(Deserialize))
    }

    fn replace_status<R: Resource>(&self, object: &R) -> StateResult<R> {
        if !R::HAS_STATUS {
            return Err(StateError::Invalid(format!(
                "{} has no status subresource",
                R::KIND
            )));
        }
        let key = object.key();
        let skey = storage_key(R::KIND, &key);

        let value = self.write_txn(|scope| {
            let mut current = scope
                .read(&skey)?
                .ok_or_else(|| StateError::NotFound(format!("{} {key}", R::KIND)))?;
            let mut meta = meta_of(&current)?;
            let expected = object.metadata().resource_version;
            if expected != meta.resource_version {
                return Err(StateError::Conflict {
                    key: skey.clone(),
                    expected,
                    actual: meta.resource_version,
                });
            }

            let incoming = serde_json::to_value(object).map_err(map_err!(Serialize))?;
            if let (Some(obj), Some(status)) = (current.as_object_mut(), incoming.get("status")) {
                obj.insert("status".to_string(), status.clone());
            }
            meta.resource_version = scope.next_revision()?;
            set_meta(&mut current, &meta)?;
            scope.write(&skey, &current)?;
            Ok(current)
        })?;

        debug!(kind = %R::KIND, %key, "status replaced");
        serde_json::from_value(value).map_err(map_err!(Deserialize))
    }

    fn delete<R: Resource>(&self, key: &ObjectKey) -> StateResult<bool> {
        let skey = storage_key(R::KIND, key);
        let existed = self.write_txn(|scope| scope.delete(&skey))?;
        debug!(kind = %R::KIND, %key, existed, "object deleted");
        Ok(existed)
    }
}
