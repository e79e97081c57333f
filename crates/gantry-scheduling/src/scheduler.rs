//! The bin-packing scheduler.
//!
//! First-fit-decreasing over the pods of a pass: pods are sorted largest
//! first, tried against the open [`SyntheticNode`]s of each admitting
//! provisioner, and open a new node when nothing fits. Nodes carry
//! symbolic requirements rather than one fixed instance type, so the
//! launcher can still choose among alternatives at launch time.

use std::sync::Arc;

use tracing::{debug, info};

use gantry_cloud::{InstanceType, fleet_requirements};
use gantry_core::requirements::keys;
use gantry_core::resources::{CPU, MEMORY, NVIDIA_GPU};
use gantry_core::taints::untolerated;
use gantry_core::{CoreResult, Requirement, Requirements, Resources};
use gantry_state::{EventRecorder, PodSpec, ProvisionerSpec};

use crate::error::{SchedulingError, SchedulingResult};
use crate::instance_types::filter_instance_types;
use crate::topology::Topology;

/// A provisioner assembled for one pass: its stored spec narrowed by
/// everything the cloud offers.
#[derive(Debug, Clone)]
pub struct LoadedProvisioner {
    pub spec: ProvisionerSpec,
    /// spec requirements ∩ labels ∩ owner label ∩ provider-announced
    /// constraints ∩ what the instance-type fleet advertises.
    pub requirements: Requirements,
    pub instance_types: Vec<InstanceType>,
    /// Aggregate requests of the daemon pods that will land on any node
    /// of this provisioner.
    pub daemon_overhead: Resources,
}

impl LoadedProvisioner {
    /// Merge a stored spec with the provider-announced requirements and
    /// the fleet it may launch. Fails when the spec itself is
    /// contradictory.
    pub fn assemble(
        spec: ProvisionerSpec,
        cloud_requirements: &[Requirement],
        instance_types: Vec<InstanceType>,
        daemon_overhead: Resources,
    ) -> CoreResult<Self> {
        let mut requirements = Requirements::try_from_iter(&spec.requirements)?;
        requirements.add(&[Requirement::within(keys::PROVISIONER_NAME, &[&spec.name])])?;
        for (key, value) in &spec.labels {
            requirements.add(&[Requirement::within(key, &[value])])?;
        }
        requirements.add(cloud_requirements)?;
        requirements.add(&fleet_requirements(&instance_types))?;
        Ok(Self {
            spec,
            requirements,
            instance_types,
            daemon_overhead,
        })
    }
}

/// An in-memory, pre-launch node description.
///
/// Created during solve; consumed exactly once by the launcher.
#[derive(Debug)]
pub struct SyntheticNode {
    /// Name of the owning provisioner.
    pub provisioner: String,
    /// Accumulated requirements, narrowed by every placed pod.
    pub requirements: Requirements,
    /// Acceptable instance types, best first. Never empty.
    pub instance_type_options: Vec<InstanceType>,
    pub pods: Vec<PodSpec>,
    /// Running total of placed pod requests.
    pub usage: Resources,
    pub daemon_overhead: Resources,
}

impl SyntheticNode {
    fn open(provisioner: &LoadedProvisioner, requirements: Requirements) -> Self {
        Self {
            provisioner: provisioner.spec.name.clone(),
            requirements,
            instance_type_options: provisioner.instance_types.clone(),
            pods: Vec::new(),
            usage: Resources::new(),
            daemon_overhead: provisioner.daemon_overhead.clone(),
        }
    }

    /// Everything the node must host if this pod joins.
    fn needed_with(&self, pod_requests: &Resources) -> Resources {
        self.usage.plus(pod_requests).plus(&self.daemon_overhead)
    }

    /// Attempt placement: narrow the requirements, refilter the instance
    /// types, record topology. All fallible steps run before any state
    /// changes, so a failure leaves node and topology untouched.
    fn try_add(
        &mut self,
        pod: &PodSpec,
        effective: &Requirements,
        topology: &mut Topology,
    ) -> SchedulingResult<()> {
        let mut narrowed = self
            .requirements
            .intersect(effective)
            .map_err(SchedulingError::from)?;
        let needed = self.needed_with(&pod_requests(pod));
        let options = filter_instance_types(&self.instance_type_options, &narrowed, &needed);
        if options.is_empty() {
            return Err(SchedulingError::NoInstanceTypes);
        }
        // Pin the instance-type key to the surviving options so the node
        // spec reflects exactly what may launch.
        narrowed.add(&[options_requirement(&options)])?;

        let _ = topology.record(pod, &narrowed);
        self.requirements = narrowed;
        self.instance_type_options = options;
        self.usage.add(&pod_requests(pod));
        self.pods.push(pod.clone());
        Ok(())
    }
}

fn options_requirement(options: &[InstanceType]) -> Requirement {
    let names: Vec<&str> = options.iter().map(|it| it.name.as_str()).collect();
    Requirement::within(keys::INSTANCE_TYPE, &names)
}

/// Pod requests plus the pod slot it occupies.
fn pod_requests(pod: &PodSpec) -> Resources {
    let mut requests = pod.requests.clone();
    requests.add(&Resources::new().pods(1));
    requests
}

/// One solve over one batch of pods. Owns the topology tracker and the
/// open node set for the duration; single-threaded by design.
pub struct Scheduler {
    provisioners: Vec<LoadedProvisioner>,
    topology: Topology,
    recorder: Arc<dyn EventRecorder>,
}

impl Scheduler {
    pub fn new(
        provisioners: Vec<LoadedProvisioner>,
        topology: Topology,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            provisioners,
            topology,
            recorder,
        }
    }

    /// Produce the minimal node set covering all schedulable input pods.
    ///
    /// Deterministic: equal inputs yield identical output, byte for
    /// byte. Pods nothing admits are deferred with an event, not an
    /// error.
    pub fn solve(mut self, pods: &[PodSpec]) -> SchedulingResult<Vec<SyntheticNode>> {
        if self.provisioners.is_empty() {
            return Err(SchedulingError::NoProvisioners);
        }

        let mut sorted: Vec<PodSpec> = pods.to_vec();
        sort_pods(&mut sorted);

        let mut nodes: Vec<SyntheticNode> = Vec::new();
        'pods: for pod in &sorted {
            let pod_id = pod.table_key();
            let pod_requirements = match Requirements::try_from_iter(&pod.node_requirements) {
                Ok(requirements) => requirements,
                Err(err) => {
                    self.recorder.pod_failed_validation(&pod_id, &err.to_string());
                    continue;
                }
            };

            for index in 0..self.provisioners.len() {
                let provisioner = &self.provisioners[index];
                if untolerated(&provisioner.spec.taints, &pod.tolerations, &[]).is_some() {
                    continue;
                }
                let Ok(base) = provisioner.requirements.intersect(&pod_requirements) else {
                    continue;
                };
                let Ok(topology_requirements) = self.topology.requirements_for(pod, &base) else {
                    continue;
                };
                let mut effective = base;
                if effective.add(&topology_requirements).is_err() {
                    continue;
                }

                // Try the provisioner's open nodes first.
                let name = self.provisioners[index].spec.name.clone();
                for node in nodes.iter_mut().filter(|n| n.provisioner == name) {
                    if node.try_add(pod, &effective, &mut self.topology).is_ok() {
                        debug!(pod = %pod_id, provisioner = %name, "pod packed onto open node");
                        continue 'pods;
                    }
                }

                // Open a new node.
                let provisioner = &self.provisioners[index];
                let mut node = SyntheticNode::open(provisioner, effective.clone());
                if node.try_add(pod, &effective, &mut self.topology).is_ok() {
                    debug!(
                        pod = %pod_id,
                        provisioner = %name,
                        options = node.instance_type_options.len(),
                        "opened node"
                    );
                    nodes.push(node);
                    continue 'pods;
                }
            }

            // No provisioner admits the pod; it stays unscheduled and is
            // revisited next pass.
            self.recorder.pod_should_schedule(&pod_id, None);
        }

        info!(
            pods = sorted.len(),
            nodes = nodes.len(),
            "solve complete"
        );
        Ok(nodes)
    }
}

/// Largest pods first (GPU, then CPU, then memory), name as the final
/// tie-break. Determinism across passes depends on this ordering.
fn sort_pods(pods: &mut [PodSpec]) {
    pods.sort_by(|a, b| {
        b.requests
            .get(NVIDIA_GPU)
            .cmp(&a.requests.get(NVIDIA_GPU))
            .then_with(|| b.requests.get(CPU).cmp(&a.requests.get(CPU)))
            .then_with(|| b.requests.get(MEMORY).cmp(&a.requests.get(MEMORY)))
            .then_with(|| a.table_key().cmp(&b.table_key()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use gantry_cloud::fleet::make_type;
    use gantry_state::{
        CapturingRecorder, Cluster, ClusterSnapshot, Event, LabelSelector, Limits, NodeRecord,
        PodAffinityTerm, ProviderPayload, TopologySpreadConstraint, WatchEvent,
    };
    use gantry_state::AffinityKind;

    fn zones3() -> Vec<String> {
        vec!["us-east-1a".into(), "us-east-1b".into(), "us-east-1c".into()]
    }

    fn m5_fleet() -> Vec<InstanceType> {
        let zones = zones3();
        vec![
            make_type("m5.large", 2000, 8 << 30, 0, 0.096, "amd64", &zones),
            make_type("m5.xlarge", 4000, 16 << 30, 0, 0.192, "amd64", &zones),
            make_type("m5.2xlarge", 8000, 32 << 30, 0, 0.384, "amd64", &zones),
        ]
    }

    fn gpu_fleet() -> Vec<InstanceType> {
        let mut fleet = m5_fleet();
        fleet.push(make_type(
            "p3.2xlarge",
            8000,
            61 << 30,
            1,
            3.06,
            "amd64",
            &zones3(),
        ));
        fleet
    }

    fn provisioner_spec(name: &str) -> ProvisionerSpec {
        ProvisionerSpec {
            name: name.into(),
            requirements: Vec::new(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            startup_taints: Vec::new(),
            kubelet: None,
            provider: ProviderPayload::default(),
            limits: Limits::default(),
        }
    }

    fn loaded(name: &str, fleet: Vec<InstanceType>, overhead: Resources) -> LoadedProvisioner {
        LoadedProvisioner::assemble(provisioner_spec(name), &[], fleet, overhead).unwrap()
    }

    fn pod(name: &str, cpu: i64, memory: i64) -> PodSpec {
        PodSpec {
            namespace: "default".into(),
            name: name.into(),
            labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
            requests: Resources::new().cpu_millis(cpu).memory_bytes(memory),
            node_requirements: Vec::new(),
            tolerations: Vec::new(),
            topology_spread: Vec::new(),
            affinities: Vec::new(),
            volume_claims: Vec::new(),
            scheduling_gated: false,
            node_name: None,
        }
    }

    fn solve(
        provisioners: Vec<LoadedProvisioner>,
        snapshot: &ClusterSnapshot,
        pods: &[PodSpec],
    ) -> (Vec<SyntheticNode>, Arc<CapturingRecorder>) {
        let recorder = Arc::new(CapturingRecorder::new());
        let topology = {
            let requirement_refs: Vec<&Requirements> =
                provisioners.iter().map(|p| &p.requirements).collect();
            Topology::new(snapshot, &requirement_refs, pods)
        };
        let scheduler = Scheduler::new(provisioners, topology, recorder.clone());
        (scheduler.solve(pods).unwrap(), recorder)
    }

    #[test]
    fn packs_three_pods_onto_one_node() {
        // Three {2 CPU, 4 GiB} pods with {0.5 CPU, 0.5 GiB} daemon
        // overhead need 6.5 CPU / 12.5 GiB: only the 2xlarge hosts them
        // together.
        let overhead = Resources::new().cpu_millis(500).memory_bytes(512 << 20);
        let provisioners = vec![loaded("default", m5_fleet(), overhead)];
        let pods = vec![
            pod("web-0", 2000, 4 << 30),
            pod("web-1", 2000, 4 << 30),
            pod("web-2", 2000, 4 << 30),
        ];

        let (nodes, recorder) = solve(provisioners, &ClusterSnapshot::default(), &pods);

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].pods.len(), 3);
        let names: Vec<&str> = nodes[0]
            .instance_type_options
            .iter()
            .map(|it| it.name.as_str())
            .collect();
        assert_eq!(names, vec!["m5.2xlarge"]);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn solve_output_is_resource_feasible() {
        let overhead = Resources::new().cpu_millis(500).memory_bytes(512 << 20);
        let provisioners = vec![loaded("default", m5_fleet(), overhead.clone())];
        let pods: Vec<PodSpec> = (0..7).map(|i| pod(&format!("web-{i}"), 1500, 2 << 30)).collect();

        let (nodes, _) = solve(provisioners, &ClusterSnapshot::default(), &pods);

        let placed: usize = nodes.iter().map(|n| n.pods.len()).sum();
        assert_eq!(placed, 7);
        for node in &nodes {
            let needed = node.usage.plus(&node.daemon_overhead);
            for it in &node.instance_type_options {
                assert!(
                    needed.fits(&it.allocatable()),
                    "node usage {needed} must fit {}",
                    it.name
                );
            }
        }
    }

    #[test]
    fn requirement_consistency_for_placed_pods() {
        let provisioners = vec![loaded("default", m5_fleet(), Resources::new())];
        let mut constrained = pod("pinned", 500, 1 << 30);
        constrained.node_requirements =
            vec![Requirement::within(keys::ZONE, &["us-east-1b"])];
        let pods = vec![pod("free", 500, 1 << 30), constrained];

        let (nodes, _) = solve(provisioners, &ClusterSnapshot::default(), &pods);

        for node in &nodes {
            for placed in &node.pods {
                let pod_requirements =
                    Requirements::try_from_iter(&placed.node_requirements).unwrap();
                assert!(node.requirements.compatible(&pod_requirements).is_ok());
            }
            assert!(
                node.instance_type_options
                    .iter()
                    .any(|it| node.requirements.compatible(&it.requirements).is_ok())
            );
        }
    }

    #[test]
    fn spreads_six_pods_across_three_zones() {
        let provisioners = vec![loaded("default", m5_fleet(), Resources::new())];
        let spread = TopologySpreadConstraint {
            key: keys::ZONE.to_string(),
            max_skew: 1,
            selector: LabelSelector::labels(&[("app", "web")]),
        };
        let pods: Vec<PodSpec> = (0..6)
            .map(|i| {
                let mut p = pod(&format!("web-{i}"), 500, 1 << 30);
                p.topology_spread = vec![spread.clone()];
                p
            })
            .collect();

        let (nodes, _) = solve(provisioners, &ClusterSnapshot::default(), &pods);

        assert_eq!(nodes.len(), 3);
        let mut zones: Vec<String> = nodes
            .iter()
            .map(|n| n.requirements.zones().first().unwrap().to_string())
            .collect();
        zones.sort();
        assert_eq!(zones, vec!["us-east-1a", "us-east-1b", "us-east-1c"]);
        for node in &nodes {
            assert_eq!(node.pods.len(), 2);
        }
    }

    #[test]
    fn gpu_pod_narrows_to_gpu_types() {
        let provisioners = vec![loaded("default", gpu_fleet(), Resources::new())];
        let mut gpu_pod = pod("train-0", 1000, 4 << 30);
        gpu_pod.requests = gpu_pod.requests.gpus(1);

        let (nodes, _) = solve(provisioners, &ClusterSnapshot::default(), &[gpu_pod]);

        assert_eq!(nodes.len(), 1);
        let names: Vec<&str> = nodes[0]
            .instance_type_options
            .iter()
            .map(|it| it.name.as_str())
            .collect();
        assert_eq!(names, vec!["p3.2xlarge"]);
        assert!(
            nodes[0]
                .requirements
                .instance_types()
                .contains("p3.2xlarge")
        );
        assert!(
            !nodes[0]
                .requirements
                .instance_types()
                .contains("m5.large")
        );
    }

    #[test]
    fn anti_affinity_avoids_occupied_zone() {
        let cluster = Cluster::new();
        cluster.apply(&WatchEvent::NodeUpserted(NodeRecord {
            name: "existing".into(),
            labels: BTreeMap::from([(keys::ZONE.to_string(), "us-east-1a".to_string())]),
            taints: Vec::new(),
            allocatable: Resources::new().cpu_millis(4000),
            provider_id: None,
            ready: true,
        }));
        let mut occupant = pod("occupant", 100, 1 << 20);
        occupant.labels = BTreeMap::from([("app".to_string(), "x".to_string())]);
        occupant.node_name = Some("existing".into());
        cluster.apply(&WatchEvent::PodUpserted(occupant));

        let provisioners = vec![loaded("default", m5_fleet(), Resources::new())];
        let mut incoming = pod("incoming", 500, 1 << 30);
        incoming.labels = BTreeMap::from([("app".to_string(), "x".to_string())]);
        incoming.affinities = vec![PodAffinityTerm {
            kind: AffinityKind::AntiAffinity,
            key: keys::ZONE.to_string(),
            selector: LabelSelector::labels(&[("app", "x")]),
        }];

        let (nodes, _) = solve(provisioners, &cluster.snapshot(), &[incoming]);

        assert_eq!(nodes.len(), 1);
        assert!(!nodes[0].requirements.zones().contains("us-east-1a"));
    }

    #[test]
    fn solve_is_deterministic() {
        let pods: Vec<PodSpec> = (0..10)
            .map(|i| pod(&format!("web-{i}"), 700 + (i % 3) * 400, (1 + i % 4) << 30))
            .collect();

        let run = || {
            let provisioners = vec![loaded("default", m5_fleet(), Resources::new())];
            let (nodes, _) = solve(provisioners, &ClusterSnapshot::default(), &pods);
            nodes
                .iter()
                .map(|n| {
                    format!(
                        "{}|{}|{:?}|{}",
                        n.provisioner,
                        n.requirements,
                        n.pods.iter().map(|p| p.table_key()).collect::<Vec<_>>(),
                        n.instance_type_options
                            .iter()
                            .map(|it| it.name.as_str())
                            .collect::<Vec<_>>()
                            .join(",")
                    )
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn empty_provisioner_list_is_fatal() {
        let recorder = Arc::new(CapturingRecorder::new());
        let scheduler = Scheduler::new(Vec::new(), Topology::default(), recorder);
        assert_eq!(
            scheduler.solve(&[pod("web-0", 100, 1 << 20)]).unwrap_err(),
            SchedulingError::NoProvisioners
        );
    }

    #[test]
    fn inadmissible_pod_gets_deferred_event() {
        let provisioners = vec![loaded("default", m5_fleet(), Resources::new())];
        let huge = pod("huge", 64_000, 256 << 30);

        let (nodes, recorder) = solve(provisioners, &ClusterSnapshot::default(), &[huge]);

        assert!(nodes.is_empty());
        assert_eq!(recorder.deferred_pods(), vec!["default/huge".to_string()]);
    }

    #[test]
    fn self_contradictory_pod_is_skipped_with_validation_event() {
        let provisioners = vec![loaded("default", m5_fleet(), Resources::new())];
        let mut bad = pod("bad", 100, 1 << 20);
        bad.node_requirements = vec![
            Requirement::within(keys::ZONE, &["us-east-1a"]),
            Requirement::within(keys::ZONE, &["us-east-1b"]),
        ];

        let (nodes, recorder) = solve(provisioners, &ClusterSnapshot::default(), &[bad]);

        assert!(nodes.is_empty());
        assert!(matches!(
            recorder.events()[0],
            Event::PodFailedValidation { .. }
        ));
    }

    #[test]
    fn untolerated_provisioner_taint_rejects_pod() {
        let mut spec = provisioner_spec("tainted");
        spec.taints = vec![gantry_core::Taint::new(
            "dedicated",
            Some("gpu"),
            gantry_core::TaintEffect::NoSchedule,
        )];
        let tainted =
            LoadedProvisioner::assemble(spec, &[], m5_fleet(), Resources::new()).unwrap();

        let (nodes, recorder) = solve(
            vec![tainted],
            &ClusterSnapshot::default(),
            &[pod("web-0", 100, 1 << 20)],
        );
        assert!(nodes.is_empty());
        assert_eq!(recorder.deferred_pods().len(), 1);

        // With the toleration, the same pod lands.
        let mut spec = provisioner_spec("tainted");
        spec.taints = vec![gantry_core::Taint::new(
            "dedicated",
            Some("gpu"),
            gantry_core::TaintEffect::NoSchedule,
        )];
        let tainted =
            LoadedProvisioner::assemble(spec, &[], m5_fleet(), Resources::new()).unwrap();
        let mut tolerant = pod("web-0", 100, 1 << 20);
        tolerant.tolerations = vec![gantry_core::Toleration::equal(
            "dedicated",
            "gpu",
            gantry_core::TaintEffect::NoSchedule,
        )];
        let (nodes, _) = solve(vec![tainted], &ClusterSnapshot::default(), &[tolerant]);
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn provisioners_are_searched_in_input_order() {
        let first = loaded("first", m5_fleet(), Resources::new());
        let second = loaded("second", m5_fleet(), Resources::new());

        let (nodes, _) = solve(
            vec![first, second],
            &ClusterSnapshot::default(),
            &[pod("web-0", 100, 1 << 20)],
        );
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].provisioner, "first");
    }

    #[test]
    fn pod_requirements_route_to_matching_provisioner() {
        let mut arm_spec = provisioner_spec("arm");
        arm_spec.requirements = vec![Requirement::within(keys::ARCH, &["arm64"])];
        let arm_fleet = vec![make_type(
            "c6g.large",
            2000,
            8 << 30,
            0,
            0.068,
            "arm64",
            &zones3(),
        )];
        let arm =
            LoadedProvisioner::assemble(arm_spec, &[], arm_fleet, Resources::new()).unwrap();
        let amd = loaded("amd", m5_fleet(), Resources::new());

        let mut arm_pod = pod("arm-0", 100, 1 << 20);
        arm_pod.node_requirements = vec![Requirement::within(keys::ARCH, &["arm64"])];

        let (nodes, _) = solve(vec![amd, arm], &ClusterSnapshot::default(), &[arm_pod]);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].provisioner, "arm");
    }

    #[test]
    fn node_requirements_carry_owner_label() {
        let provisioners = vec![loaded("default", m5_fleet(), Resources::new())];
        let (nodes, _) = solve(
            provisioners,
            &ClusterSnapshot::default(),
            &[pod("web-0", 100, 1 << 20)],
        );
        assert_eq!(
            nodes[0].requirements.provisioner_name().as_deref(),
            Some("default")
        );
    }

    #[test]
    fn sort_order_is_gpu_cpu_memory_name() {
        let mut pods = vec![
            pod("b", 1000, 1 << 30),
            pod("a", 1000, 1 << 30),
            pod("big-mem", 1000, 8 << 30),
            pod("big-cpu", 4000, 1 << 30),
        ];
        let mut gpu = pod("gpu", 100, 1 << 20);
        gpu.requests = gpu.requests.gpus(1);
        pods.push(gpu);

        sort_pods(&mut pods);
        let names: Vec<&str> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["gpu", "big-cpu", "big-mem", "a", "b"]);
    }
}
