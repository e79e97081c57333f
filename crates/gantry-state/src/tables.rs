//! redb table definitions for the cluster store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Namespaced objects use `{namespace}/{name}` keys; nodes and
//! provisioners are cluster-scoped and keyed by name.

use redb::TableDefinition;

/// The shape every cluster table shares: `&str` keys, JSON byte values.
pub type RawTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Pod specs keyed by `{namespace}/{name}`.
pub const PODS: TableDefinition<&str, &[u8]> = TableDefinition::new("pods");

/// Node records keyed by node name.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Provisioner specs keyed by name.
pub const PROVISIONERS: TableDefinition<&str, &[u8]> = TableDefinition::new("provisioners");

/// Daemon set specs keyed by `{namespace}/{name}`.
pub const DAEMON_SETS: TableDefinition<&str, &[u8]> = TableDefinition::new("daemon_sets");

/// Persistent claims keyed by `{namespace}/{name}`.
pub const CLAIMS: TableDefinition<&str, &[u8]> = TableDefinition::new("claims");
