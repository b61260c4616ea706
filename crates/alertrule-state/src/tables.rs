//! redb table definitions for the object store.

use redb::TableDefinition;

/// Serialized objects keyed by `{kind}/{namespace}/{name}`.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Owner reverse index keyed by `{owner_uid}|{dependent key}`; the value is
/// the dependent key.
pub const OWNERS: TableDefinition<&str, &str> = TableDefinition::new("owners");

/// Store-wide counters. Holds the `revision` that feeds resource versions.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

pub const REVISION_KEY: &str = "revision";
