//! Object identity and metadata shared by every stored resource.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Resource kinds the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Deployment,
    AlertRule,
    PrometheusRule,
    ConfigMap,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Deployment => "Deployment",
            Kind::AlertRule => "AlertRule",
            Kind::PrometheusRule => "PrometheusRule",
            Kind::ConfigMap => "ConfigMap",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            Kind::Deployment => "apps/v1",
            Kind::AlertRule => "monitoring.my.domain/v1",
            Kind::PrometheusRule => "monitoring.coreos.com/v1",
            Kind::ConfigMap => "v1",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{namespace}/{name}` identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`.
    pub fn parse(s: &str) -> Option<Self> {
        let (namespace, name) = s.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pointer from a dependent to the object responsible for its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: Kind,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Standard object metadata. `uid`, `resource_version`, `generation` and the
/// timestamps are owned by the store; values supplied by callers are
/// overwritten on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Deletion has been requested but finalizers are still pending.
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// The owner reference flagged as managing controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// A typed object the store can persist.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: Kind;

    /// Objects with a status subresource keep `status` out of regular
    /// create/replace writes; only `replace_status` changes it.
    const HAS_STATUS: bool = false;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_parse() {
        assert_eq!(
            ObjectKey::parse("default/checkout"),
            Some(ObjectKey::new("default", "checkout"))
        );
        assert!(ObjectKey::parse("checkout").is_none());
        assert!(ObjectKey::parse("/checkout").is_none());
        assert!(ObjectKey::parse("a/b/c").is_none());
        assert_eq!(ObjectKey::new("ns", "x").to_string(), "ns/x");
    }

    #[test]
    fn meta_serializes_camel_case_and_skips_empty() {
        let meta = ObjectMeta::new("default", "a");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["name"], "a");
        assert_eq!(json["resourceVersion"], 0);
        assert!(json.get("labels").is_none());
        assert!(json.get("deletionTimestamp").is_none());
    }

    #[test]
    fn controller_owner_picks_flagged_reference() {
        let mut meta = ObjectMeta::new("default", "a");
        meta.owner_references.push(OwnerReference {
            api_version: "v1".into(),
            kind: Kind::ConfigMap,
            name: "other".into(),
            uid: "u1".into(),
            controller: false,
            block_owner_deletion: false,
        });
        assert!(meta.controller_owner().is_none());
        meta.owner_references.push(OwnerReference {
            api_version: Kind::Deployment.api_version().into(),
            kind: Kind::Deployment,
            name: "web".into(),
            uid: "u2".into(),
            controller: true,
            block_owner_deletion: true,
        });
        assert_eq!(meta.controller_owner().map(|r| r.uid.as_str()), Some("u2"));
    }
}
