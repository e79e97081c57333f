//! In-memory cluster mirror.
//!
//! The [`Cluster`] follows the store's watch stream and maintains a view
//! of nodes and the pods assigned to them (bound or in-flight). The
//! scheduler never reads the mirror directly; it takes a
//! [`ClusterSnapshot`] at the start of a pass and reads that immutable
//! view lock-free.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use gantry_core::Resources;

use crate::store::WatchEvent;
use crate::types::{NodeName, PodId};

/// A pod as the mirror tracks it: enough to count topology domains and
/// usage, nothing more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPod {
    pub id: PodId,
    pub labels: BTreeMap<String, String>,
    pub requests: Resources,
}

/// A node joined with its assigned pods, as published in a snapshot.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub name: NodeName,
    pub labels: BTreeMap<String, String>,
    pub allocatable: Resources,
    pub ready: bool,
    pub pods: Vec<MirrorPod>,
}

impl ClusterNode {
    /// The provisioner that owns this node, if labelled.
    pub fn provisioner(&self) -> Option<&str> {
        self.labels
            .get(gantry_core::requirements::keys::PROVISIONER_NAME)
            .map(|s| s.as_str())
    }

    /// Allocatable minus the requests of assigned pods.
    pub fn available(&self) -> Resources {
        let used = Resources::sum(self.pods.iter().map(|p| &p.requests));
        self.allocatable.saturating_sub(&used)
    }
}

/// An immutable point-in-time view of the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    nodes: Vec<Arc<ClusterNode>>,
}

impl ClusterSnapshot {
    pub fn nodes(&self) -> &[Arc<ClusterNode>] {
        &self.nodes
    }

    /// Aggregate allocatable of the nodes a provisioner currently owns.
    /// This is the usage the provisioner's limits are checked against.
    pub fn provisioner_usage(&self, provisioner: &str) -> Resources {
        Resources::sum(
            self.nodes
                .iter()
                .filter(|n| n.provisioner() == Some(provisioner))
                .map(|n| &n.allocatable),
        )
    }

    /// All assigned pods with the node they sit on.
    pub fn pods(&self) -> impl Iterator<Item = (&Arc<ClusterNode>, &MirrorPod)> {
        self.nodes
            .iter()
            .flat_map(|node| node.pods.iter().map(move |pod| (node, pod)))
    }
}

#[derive(Debug, Clone)]
struct StoredNode {
    labels: BTreeMap<String, String>,
    allocatable: Resources,
    ready: bool,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<NodeName, StoredNode>,
    /// Pod → (assigned node, tracked fields). Unassigned pods are not
    /// mirrored; they are the provisioner's input, not cluster state.
    pods: BTreeMap<PodId, (NodeName, MirrorPod)>,
}

/// The live mirror. Written by the watch pump, snapshotted by the
/// provisioning loop.
#[derive(Default)]
pub struct Cluster {
    inner: RwLock<Inner>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one watch event to the view.
    pub fn apply(&self, event: &WatchEvent) {
        let mut inner = self.inner.write().expect("mirror lock poisoned");
        match event {
            WatchEvent::NodeUpserted(node) => {
                inner.nodes.insert(
                    node.name.clone(),
                    StoredNode {
                        labels: node.labels.clone(),
                        allocatable: node.allocatable.clone(),
                        ready: node.ready,
                    },
                );
            }
            WatchEvent::NodeDeleted(name) => {
                inner.nodes.remove(name);
                inner.pods.retain(|_, (node, _)| *node != *name);
            }
            WatchEvent::PodUpserted(pod) => {
                let id = pod.table_key();
                match &pod.node_name {
                    Some(node) => {
                        inner.pods.insert(
                            id.clone(),
                            (
                                node.clone(),
                                MirrorPod {
                                    id,
                                    labels: pod.labels.clone(),
                                    requests: pod.requests.clone(),
                                },
                            ),
                        );
                    }
                    None => {
                        inner.pods.remove(&id);
                    }
                }
            }
            WatchEvent::PodDeleted(id) => {
                inner.pods.remove(id);
            }
            // Provisioner objects are read from the store per pass.
            WatchEvent::ProvisionerUpserted(_) | WatchEvent::ProvisionerDeleted(_) => {}
        }
    }

    /// Publish an immutable view joining nodes with their pods. Pods
    /// referencing a node the mirror has not seen yet are skipped; the
    /// node event will arrive and the next snapshot will include them.
    pub fn snapshot(&self) -> ClusterSnapshot {
        let inner = self.inner.read().expect("mirror lock poisoned");
        let mut nodes: BTreeMap<&NodeName, ClusterNode> = inner
            .nodes
            .iter()
            .map(|(name, n)| {
                (
                    name,
                    ClusterNode {
                        name: name.clone(),
                        labels: n.labels.clone(),
                        allocatable: n.allocatable.clone(),
                        ready: n.ready,
                        pods: Vec::new(),
                    },
                )
            })
            .collect();
        for (node_name, pod) in inner.pods.values() {
            match nodes.get_mut(node_name) {
                Some(node) => node.pods.push(pod.clone()),
                None => debug!(pod = %pod.id, node = %node_name, "pod references unknown node"),
            }
        }
        ClusterSnapshot {
            nodes: nodes.into_values().map(Arc::new).collect(),
        }
    }

    /// Drive the mirror from a store watch subscription until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.apply(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "mirror lagged behind the watch stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("mirror stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeRecord, PodSpec};
    use gantry_core::requirements::keys;

    fn node(name: &str, zone: &str, provisioner: &str, cpu: i64) -> NodeRecord {
        NodeRecord {
            name: name.into(),
            labels: BTreeMap::from([
                (keys::ZONE.to_string(), zone.to_string()),
                (keys::PROVISIONER_NAME.to_string(), provisioner.to_string()),
            ]),
            taints: Vec::new(),
            allocatable: Resources::new().cpu_millis(cpu),
            provider_id: None,
            ready: true,
        }
    }

    fn bound_pod(name: &str, node: &str, app: &str) -> PodSpec {
        PodSpec {
            namespace: "default".into(),
            name: name.into(),
            labels: BTreeMap::from([("app".to_string(), app.to_string())]),
            requests: Resources::new().cpu_millis(500),
            node_requirements: Vec::new(),
            tolerations: Vec::new(),
            topology_spread: Vec::new(),
            affinities: Vec::new(),
            volume_claims: Vec::new(),
            scheduling_gated: false,
            node_name: Some(node.into()),
        }
    }

    #[test]
    fn snapshot_joins_pods_onto_nodes() {
        let cluster = Cluster::new();
        cluster.apply(&WatchEvent::NodeUpserted(node("n1", "a", "default", 4000)));
        cluster.apply(&WatchEvent::PodUpserted(bound_pod("web-0", "n1", "web")));
        cluster.apply(&WatchEvent::PodUpserted(bound_pod("web-1", "n1", "web")));

        let snapshot = cluster.snapshot();
        assert_eq!(snapshot.nodes().len(), 1);
        assert_eq!(snapshot.nodes()[0].pods.len(), 2);
        assert_eq!(snapshot.nodes()[0].available().get("cpu"), 3000);
    }

    #[test]
    fn unassigned_pods_are_not_mirrored() {
        let cluster = Cluster::new();
        cluster.apply(&WatchEvent::NodeUpserted(node("n1", "a", "default", 4000)));
        let mut pod = bound_pod("web-0", "n1", "web");
        pod.node_name = None;
        cluster.apply(&WatchEvent::PodUpserted(pod));

        let snapshot = cluster.snapshot();
        assert!(snapshot.nodes()[0].pods.is_empty());
    }

    #[test]
    fn node_delete_drops_its_pods() {
        let cluster = Cluster::new();
        cluster.apply(&WatchEvent::NodeUpserted(node("n1", "a", "default", 4000)));
        cluster.apply(&WatchEvent::PodUpserted(bound_pod("web-0", "n1", "web")));
        cluster.apply(&WatchEvent::NodeDeleted("n1".into()));

        let snapshot = cluster.snapshot();
        assert!(snapshot.nodes().is_empty());
        assert_eq!(snapshot.pods().count(), 0);
    }

    #[test]
    fn provisioner_usage_sums_owned_nodes() {
        let cluster = Cluster::new();
        cluster.apply(&WatchEvent::NodeUpserted(node("n1", "a", "default", 4000)));
        cluster.apply(&WatchEvent::NodeUpserted(node("n2", "b", "default", 4000)));
        cluster.apply(&WatchEvent::NodeUpserted(node("n3", "a", "gpu", 8000)));

        let snapshot = cluster.snapshot();
        assert_eq!(snapshot.provisioner_usage("default").get("cpu"), 8000);
        assert_eq!(snapshot.provisioner_usage("gpu").get("cpu"), 8000);
        assert_eq!(snapshot.provisioner_usage("none").get("cpu"), 0);
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let cluster = Cluster::new();
        cluster.apply(&WatchEvent::NodeUpserted(node("n1", "a", "default", 4000)));
        let snapshot = cluster.snapshot();

        cluster.apply(&WatchEvent::NodeDeleted("n1".into()));
        assert_eq!(snapshot.nodes().len(), 1);
        assert!(cluster.snapshot().nodes().is_empty());
    }

    #[tokio::test]
    async fn run_applies_store_events() {
        use crate::store::ClusterStore;

        let store = ClusterStore::open_in_memory().unwrap();
        let cluster = Arc::new(Cluster::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pump = tokio::spawn(cluster.clone().run(store.watch(), shutdown_rx));

        store.put_node(&node("n1", "a", "default", 4000)).unwrap();
        // Yield until the pump has applied the event.
        for _ in 0..100 {
            if !cluster.snapshot().nodes().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cluster.snapshot().nodes().len(), 1);

        shutdown_tx.send(true).unwrap();
        pump.await.unwrap();
    }
}
