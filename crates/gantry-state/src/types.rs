//! Domain types for the cluster store.
//!
//! These types represent the objects the provisioner observes (pods,
//! nodes, provisioners, daemon sets, claims). All types are serializable
//! to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gantry_core::requirements::Operator;
use gantry_core::{Requirement, Resources, Taint, Toleration};

/// Unique identifier for a pod (`{namespace}/{name}`).
pub type PodId = String;

/// Unique identifier for a node.
pub type NodeName = String;

// ── Selectors ──────────────────────────────────────────────────────

/// A label selector with exact matches and expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<Requirement>,
}

impl LabelSelector {
    pub fn labels(labels: &[(&str, &str)]) -> Self {
        Self {
            match_labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    /// Whether the selector matches a label map.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
        for expr in &self.match_expressions {
            let actual = labels.get(&expr.key);
            let ok = match expr.operator {
                Operator::In => actual.is_some_and(|v| expr.values.contains(v)),
                Operator::NotIn => actual.is_none_or(|v| !expr.values.contains(v)),
                Operator::Exists => actual.is_some(),
                Operator::DoesNotExist => actual.is_none(),
                Operator::Gt => numeric(actual)
                    .zip(bound(expr))
                    .is_some_and(|(v, b)| v > b),
                Operator::Lt => numeric(actual)
                    .zip(bound(expr))
                    .is_some_and(|(v, b)| v < b),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

fn numeric(value: Option<&String>) -> Option<i64> {
    value.and_then(|v| v.parse().ok())
}

fn bound(expr: &Requirement) -> Option<i64> {
    expr.values.first().and_then(|v| v.parse().ok())
}

// ── Pod ────────────────────────────────────────────────────────────

/// A topology-spread constraint declared by a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySpreadConstraint {
    /// The node label the spread domains are read from.
    pub key: String,
    /// Maximum allowed difference between the most and least populated
    /// domains.
    pub max_skew: u32,
    /// Which pods count toward the spread.
    pub selector: LabelSelector,
}

/// Whether an affinity term attracts or repels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityKind {
    Affinity,
    AntiAffinity,
}

/// A required pod-(anti)affinity term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodAffinityTerm {
    pub kind: AffinityKind,
    /// The node label defining the topology domain.
    pub key: String,
    /// Which existing pods the term is evaluated against.
    pub selector: LabelSelector,
}

/// Specification of a pod as the provisioner sees it. Immutable within a
/// scheduling pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Aggregate resource requests across containers.
    #[serde(default)]
    pub requests: Resources,
    /// Node-selector terms.
    #[serde(default)]
    pub node_requirements: Vec<Requirement>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub topology_spread: Vec<TopologySpreadConstraint>,
    #[serde(default)]
    pub affinities: Vec<PodAffinityTerm>,
    /// Names of persistent claims the pod mounts.
    #[serde(default)]
    pub volume_claims: Vec<String>,
    /// Pods with a closed scheduling gate are not provisionable yet.
    #[serde(default)]
    pub scheduling_gated: bool,
    /// The node the pod is bound to, once assigned.
    #[serde(default)]
    pub node_name: Option<NodeName>,
}

impl PodSpec {
    /// Build the composite key for the pods table.
    pub fn table_key(&self) -> PodId {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Unassigned, gate open. Validation happens separately.
    pub fn is_provisionable(&self) -> bool {
        self.node_name.is_none() && !self.scheduling_gated
    }
}

// ── Node ───────────────────────────────────────────────────────────

/// A node object as registered in the cluster store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: NodeName,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Capacity minus system reservation.
    #[serde(default)]
    pub allocatable: Resources,
    /// Cloud identity, e.g. `aws:///us-east-1a/i-0abc`.
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub ready: bool,
}

impl NodeRecord {
    pub fn table_key(&self) -> &str {
        &self.name
    }

    /// The provisioner that owns this node, read from the name label.
    pub fn provisioner(&self) -> Option<&str> {
        self.labels
            .get(gantry_core::requirements::keys::PROVISIONER_NAME)
            .map(|s| s.as_str())
    }
}

// ── Provisioner ────────────────────────────────────────────────────

/// Kubelet settings handed to node bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeletConfig {
    #[serde(default)]
    pub cluster_dns: Option<String>,
    #[serde(default)]
    pub max_pods: Option<u32>,
}

/// Provider-opaque payload, a tagged sum over known provider variants.
/// The provisioning core routes on the variant and never interprets the
/// contents; only the matching cloud adapter decodes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderPayload {
    Static {
        #[serde(default)]
        fleet: Option<String>,
    },
    Aws {
        #[serde(default)]
        instance_profile: Option<String>,
        #[serde(default)]
        launch_template: Option<String>,
    },
}

impl ProviderPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderPayload::Static { .. } => "static",
            ProviderPayload::Aws { .. } => "aws",
        }
    }
}

impl Default for ProviderPayload {
    fn default() -> Self {
        ProviderPayload::Static { fleet: None }
    }
}

/// A provisioner's per-resource ceiling, counted against the nodes it
/// currently owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub resources: Resources,
}

/// A limit that would be crossed by a launch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{resource} usage {usage} exceeds provisioner limit {limit}")]
pub struct LimitExceeded {
    pub resource: String,
    pub usage: i64,
    pub limit: i64,
}

impl Limits {
    /// Check projected usage against the ceiling. Unlimited resources are
    /// simply absent from the limit vector.
    pub fn exceeded_by(&self, usage: &Resources) -> Result<(), LimitExceeded> {
        match usage.exceeding(&self.resources) {
            Some((resource, usage, limit)) => Err(LimitExceeded {
                resource,
                usage,
                limit,
            }),
            None => Ok(()),
        }
    }
}

/// A named provisioning policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionerSpec {
    pub name: String,
    /// Constraints every node of this provisioner must satisfy.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Labels stamped onto every node.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Taints applied to every node.
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Taints applied at launch and removed by an external controller
    /// once the node has initialized.
    #[serde(default)]
    pub startup_taints: Vec<Taint>,
    #[serde(default)]
    pub kubelet: Option<KubeletConfig>,
    #[serde(default)]
    pub provider: ProviderPayload,
    #[serde(default)]
    pub limits: Limits,
}

impl ProvisionerSpec {
    pub fn table_key(&self) -> &str {
        &self.name
    }
}

// ── Daemon sets ────────────────────────────────────────────────────

/// The scheduling-relevant part of a daemon pod template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonPodTemplate {
    #[serde(default)]
    pub requests: Resources,
    #[serde(default)]
    pub node_requirements: Vec<Requirement>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

/// A daemon set whose pods land on every admitting node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSetSpec {
    pub namespace: String,
    pub name: String,
    pub template: DaemonPodTemplate,
}

impl DaemonSetSpec {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// ── Persistent claims ──────────────────────────────────────────────

/// Binding phase of a persistent claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPhase {
    Pending,
    Bound,
}

/// A persistent claim referenced by pods; a zone pins every consumer to
/// that topology domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentClaim {
    pub namespace: String,
    pub name: String,
    pub phase: ClaimPhase,
    /// The zone the backing volume lives in (or is constrained to by its
    /// storage class), if any.
    #[serde(default)]
    pub zone: Option<String>,
}

impl PersistentClaim {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
