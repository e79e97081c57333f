//! Topology tracking.
//!
//! One [`TopologyGroup`] exists per distinct (kind, key, selector)
//! signature across the pods of a pass. Counts cover pods already in the
//! cluster (bound or in-flight, read from the mirror snapshot) plus pods
//! placed earlier in the same pass. Mutations made while packing are
//! reversible through [`RecordUndo`] tokens.

use std::collections::BTreeMap;

use tracing::trace;

use gantry_core::{Requirement, Requirements};
use gantry_state::{AffinityKind, ClusterSnapshot, LabelSelector, PodSpec};

use crate::error::{SchedulingError, SchedulingResult};

/// What a group constrains.
#[derive(Debug, Clone, PartialEq, Eq)]
enum GroupKind {
    Spread { max_skew: u32 },
    Affinity,
    AntiAffinity,
}

/// Per-domain pod counts under one constraint signature.
#[derive(Debug)]
struct TopologyGroup {
    kind: GroupKind,
    key: String,
    selector: LabelSelector,
    domains: BTreeMap<String, u32>,
}

impl TopologyGroup {
    fn matches_signature(&self, kind: &GroupKind, key: &str, selector: &LabelSelector) -> bool {
        self.kind == *kind && self.key == key && self.selector == *selector
    }

    /// Smallest count across all known domains.
    fn min_count(&self) -> u32 {
        self.domains.values().copied().min().unwrap_or(0)
    }

    fn admits(&self, count: u32) -> bool {
        match &self.kind {
            // After placing into an admitted domain, max − min stays
            // within the skew.
            GroupKind::Spread { max_skew } => count <= self.min_count() + max_skew - 1,
            GroupKind::Affinity => count >= 1,
            GroupKind::AntiAffinity => count == 0,
        }
    }

    /// Deterministic best admissible domain among those `allowed`
    /// permits: lowest count first, then lexicographic.
    fn next_domain(&self, allowed: &Requirements) -> Option<&str> {
        self.domains
            .iter()
            .filter(|(domain, count)| self.admits(**count) && allowed.allows(&self.key, domain))
            .min_by_key(|(domain, count)| (**count, domain.as_str()))
            .map(|(domain, _)| domain.as_str())
    }
}

/// Undo token for one `record` call.
#[derive(Debug, Default)]
#[must_use = "dropping the undo token makes the record permanent"]
pub struct RecordUndo {
    entries: Vec<(usize, String)>,
}

/// Tracker over every topology group of a pass. Owned and mutated by the
/// scheduler only; a solve is single-threaded.
#[derive(Debug, Default)]
pub struct Topology {
    groups: Vec<TopologyGroup>,
}

impl Topology {
    /// Build groups from the pass's pods, seeding domains from mirror
    /// nodes and the provisioners' admitted values, and counting pods
    /// already assigned in the cluster.
    pub fn new(
        snapshot: &ClusterSnapshot,
        provisioner_requirements: &[&Requirements],
        pods: &[PodSpec],
    ) -> Self {
        let mut topology = Topology::default();
        for pod in pods {
            for spread in &pod.topology_spread {
                topology.add_group(
                    GroupKind::Spread {
                        max_skew: spread.max_skew.max(1),
                    },
                    &spread.key,
                    &spread.selector,
                );
            }
            for term in &pod.affinities {
                let kind = match term.kind {
                    AffinityKind::Affinity => GroupKind::Affinity,
                    AffinityKind::AntiAffinity => GroupKind::AntiAffinity,
                };
                topology.add_group(kind, &term.key, &term.selector);
            }
        }

        for group in &mut topology.groups {
            // Domains seen on existing nodes.
            for node in snapshot.nodes() {
                if let Some(domain) = node.labels.get(&group.key) {
                    group.domains.entry(domain.clone()).or_insert(0);
                }
            }
            // Domains a provisioner could still create nodes in.
            for requirements in provisioner_requirements {
                if let Some(catalog) = requirements.values(&group.key).catalog() {
                    for domain in catalog {
                        group.domains.entry(domain.clone()).or_insert(0);
                    }
                }
            }
            // Existing pods, bucketed by their node's domain label.
            for (node, pod) in snapshot.pods() {
                if group.selector.matches(&pod.labels) {
                    if let Some(domain) = node.labels.get(&group.key) {
                        *group.domains.entry(domain.clone()).or_insert(0) += 1;
                    }
                }
            }
        }
        topology
    }

    fn add_group(&mut self, kind: GroupKind, key: &str, selector: &LabelSelector) {
        if !self
            .groups
            .iter()
            .any(|g| g.matches_signature(&kind, key, selector))
        {
            self.groups.push(TopologyGroup {
                kind,
                key: key.to_string(),
                selector: selector.clone(),
                domains: BTreeMap::new(),
            });
        }
    }

    /// The requirements that keep every group the pod declares satisfied
    /// once the pod lands: one domain per constrained key, chosen
    /// deterministically among the admissible set.
    pub fn requirements_for(
        &self,
        pod: &PodSpec,
        allowed: &Requirements,
    ) -> SchedulingResult<Vec<Requirement>> {
        let mut working = allowed.clone();
        let mut out = Vec::new();
        for group in self.groups_declared_by(pod) {
            let domain = group
                .next_domain(&working)
                .ok_or_else(|| SchedulingError::NoAdmissibleDomain {
                    key: group.key.clone(),
                })?
                .to_string();
            let requirement = Requirement::within(&group.key, &[&domain]);
            working.add(std::slice::from_ref(&requirement))?;
            out.push(requirement);
        }
        Ok(out)
    }

    /// Count the pod into every group that selects it, at the domain the
    /// target node's requirements pin for the group's key. Returns the
    /// token that reverses exactly this mutation.
    pub fn record(&mut self, pod: &PodSpec, node_requirements: &Requirements) -> RecordUndo {
        let mut undo = RecordUndo::default();
        for (index, group) in self.groups.iter_mut().enumerate() {
            if !group.selector.matches(&pod.labels) {
                continue;
            }
            let Some(domain) = node_requirements
                .values(&group.key)
                .first()
                .map(|d| d.to_string())
            else {
                continue;
            };
            *group.domains.entry(domain.clone()).or_insert(0) += 1;
            trace!(key = %group.key, %domain, "topology recorded");
            undo.entries.push((index, domain));
        }
        undo
    }

    /// Reverse a `record`.
    pub fn unrecord(&mut self, undo: RecordUndo) {
        for (index, domain) in undo.entries {
            if let Some(count) = self.groups[index].domains.get_mut(&domain) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Groups originating from the pod's own constraints.
    fn groups_declared_by(&self, pod: &PodSpec) -> impl Iterator<Item = &TopologyGroup> {
        self.groups.iter().filter(|group| {
            pod.topology_spread.iter().any(|s| {
                group.matches_signature(
                    &GroupKind::Spread {
                        max_skew: s.max_skew.max(1),
                    },
                    &s.key,
                    &s.selector,
                )
            }) || pod.affinities.iter().any(|t| {
                let kind = match t.kind {
                    AffinityKind::Affinity => GroupKind::Affinity,
                    AffinityKind::AntiAffinity => GroupKind::AntiAffinity,
                };
                group.matches_signature(&kind, &t.key, &t.selector)
            })
        })
    }

    /// Current count for a (key, domain) across spread groups; test and
    /// invariant support.
    pub fn skew(&self, key: &str) -> Option<(u32, u32)> {
        self.groups
            .iter()
            .find(|g| matches!(g.kind, GroupKind::Spread { .. }) && g.key == key)
            .map(|g| {
                let min = g.domains.values().copied().min().unwrap_or(0);
                let max = g.domains.values().copied().max().unwrap_or(0);
                (min, max)
            })
    }
}
