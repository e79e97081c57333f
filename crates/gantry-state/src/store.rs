//! ClusterStore — redb-backed cluster object storage.
//!
//! Provides typed CRUD operations over pods, nodes, provisioners, daemon
//! sets and persistent claims. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing), and broadcasts a [`WatchEvent`] for
//! every mutation so the cluster mirror can follow along.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A mutation observed on the store.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    PodUpserted(PodSpec),
    PodDeleted(PodId),
    NodeUpserted(NodeRecord),
    NodeDeleted(NodeName),
    ProvisionerUpserted(ProvisionerSpec),
    ProvisionerDeleted(String),
}

/// Thread-safe cluster store backed by redb.
#[derive(Clone)]
pub struct ClusterStore {
    db: Arc<Database>,
    watch: broadcast::Sender<WatchEvent>,
}

impl ClusterStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::wrap(db)?;
        debug!(?path, "cluster store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing and standalone
    /// runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::wrap(db)?;
        debug!("in-memory cluster store opened");
        Ok(store)
    }

    fn wrap(db: Database) -> StateResult<Self> {
        let (watch, _) = broadcast::channel(256);
        let store = Self {
            db: Arc::new(db),
            watch,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PODS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(PROVISIONERS).map_err(map_err!(Table))?;
        txn.open_table(DAEMON_SETS).map_err(map_err!(Table))?;
        txn.open_table(CLAIMS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to the mutation stream. Events are emitted after the
    /// backing transaction commits.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.watch.subscribe()
    }

    fn emit(&self, event: WatchEvent) {
        // No receivers is fine; the daemon may not have started its pump.
        let _ = self.watch.send(event);
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: serde::Serialize>(&self, table: RawTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: serde::de::DeserializeOwned>(
        &self,
        table: RawTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: serde::de::DeserializeOwned>(&self, table: RawTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn delete(&self, table: RawTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Pods ───────────────────────────────────────────────────────

    pub fn put_pod(&self, pod: &PodSpec) -> StateResult<()> {
        self.put(PODS, &pod.table_key(), pod)?;
        self.emit(WatchEvent::PodUpserted(pod.clone()));
        Ok(())
    }

    pub fn get_pod(&self, key: &str) -> StateResult<Option<PodSpec>> {
        self.get(PODS, key)
    }

    pub fn list_pods(&self) -> StateResult<Vec<PodSpec>> {
        self.list(PODS)
    }

    pub fn delete_pod(&self, key: &str) -> StateResult<bool> {
        let existed = self.delete(PODS, key)?;
        if existed {
            self.emit(WatchEvent::PodDeleted(key.to_string()));
        }
        Ok(existed)
    }

    /// Create a binding: assign the pod to a node. Fails with `NotFound`
    /// for unknown pods and `AlreadyExists` when the pod is bound to a
    /// different node.
    pub fn bind_pod(&self, pod_key: &str, node: &str) -> StateResult<()> {
        let mut pod = self
            .get_pod(pod_key)?
            .ok_or_else(|| StateError::NotFound(pod_key.to_string()))?;
        if let Some(existing) = &pod.node_name {
            if existing == node {
                return Ok(());
            }
            return Err(StateError::AlreadyExists(format!(
                "{pod_key} bound to {existing}"
            )));
        }
        pod.node_name = Some(node.to_string());
        self.put_pod(&pod)?;
        debug!(pod = %pod_key, %node, "binding created");
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Register a node object. Returns `AlreadyExists` when a node of the
    /// same name is present; callers racing self-registration treat that
    /// as success.
    pub fn create_node(&self, node: &NodeRecord) -> StateResult<()> {
        let bytes = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(NODES).map_err(map_err!(Table))?;
            if t.get(node.table_key()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(node.name.clone()));
            }
            t.insert(node.table_key(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.emit(WatchEvent::NodeUpserted(node.clone()));
        debug!(node = %node.name, "node registered");
        Ok(())
    }

    /// Insert or replace a node record.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        self.put(NODES, node.table_key(), node)?;
        self.emit(WatchEvent::NodeUpserted(node.clone()));
        Ok(())
    }

    pub fn get_node(&self, name: &str) -> StateResult<Option<NodeRecord>> {
        self.get(NODES, name)
    }

    pub fn list_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        self.list(NODES)
    }

    pub fn delete_node(&self, name: &str) -> StateResult<bool> {
        let existed = self.delete(NODES, name)?;
        if existed {
            self.emit(WatchEvent::NodeDeleted(name.to_string()));
        }
        Ok(existed)
    }

    // ── Provisioners ───────────────────────────────────────────────

    pub fn put_provisioner(&self, provisioner: &ProvisionerSpec) -> StateResult<()> {
        self.put(PROVISIONERS, provisioner.table_key(), provisioner)?;
        self.emit(WatchEvent::ProvisionerUpserted(provisioner.clone()));
        Ok(())
    }

    pub fn get_provisioner(&self, name: &str) -> StateResult<Option<ProvisionerSpec>> {
        self.get(PROVISIONERS, name)
    }

    pub fn list_provisioners(&self) -> StateResult<Vec<ProvisionerSpec>> {
        self.list(PROVISIONERS)
    }

    pub fn delete_provisioner(&self, name: &str) -> StateResult<bool> {
        let existed = self.delete(PROVISIONERS, name)?;
        if existed {
            self.emit(WatchEvent::ProvisionerDeleted(name.to_string()));
        }
        Ok(existed)
    }

    // ── Daemon sets ────────────────────────────────────────────────

    pub fn put_daemon_set(&self, daemon_set: &DaemonSetSpec) -> StateResult<()> {
        self.put(DAEMON_SETS, &daemon_set.table_key(), daemon_set)
    }

    pub fn list_daemon_sets(&self) -> StateResult<Vec<DaemonSetSpec>> {
        self.list(DAEMON_SETS)
    }

    // ── Persistent claims ──────────────────────────────────────────

    pub fn put_claim(&self, claim: &PersistentClaim) -> StateResult<()> {
        self.put(CLAIMS, &claim.table_key(), claim)
    }

    pub fn get_claim(&self, key: &str) -> StateResult<Option<PersistentClaim>> {
        self.get(CLAIMS, key)
    }
}
