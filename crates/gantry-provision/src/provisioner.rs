//! The provisioning pass driver.
//!
//! Waits on the batcher, then drives one pass: list provisionable pods,
//! load provisioners and their fleets, compute daemon overhead, solve,
//! and launch every resulting synthetic node in parallel — re-checking
//! provisioner limits, creating capacity, registering the node object
//! idempotently, and binding pods that tolerate the node's taints.
//!
//! After every pass the driver publishes on a dedicated pass-completion
//! channel; waiters subscribe there instead of poking at the batcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use gantry_cloud::{CloudProvider, NodeRequest, NodeTemplate};
use gantry_core::taints::untolerated;
use gantry_core::{Requirements, Resources, TaintEffect, Toleration};
use gantry_metrics::MetricsRegistry;
use gantry_scheduling::{LoadedProvisioner, Scheduler, SyntheticNode, Topology};
use gantry_state::{
    Cluster, ClusterStore, DaemonSetSpec, EventRecorder, NodeRecord, PodSpec, ProvisionerSpec,
};

use crate::batcher::Batcher;
use crate::error::{ProvisionError, ProvisionResult};
use crate::overlay::merge_node;
use crate::volume_topology::VolumeTopology;

/// Taint gantry places on nodes it launched that have not initialized.
pub const NOT_READY_TAINT_KEY: &str = "node.gantry.dev/not-ready";
/// The orchestrator's own not-ready taint.
pub const NODE_NOT_READY_TAINT_KEY: &str = "node.kubernetes.io/not-ready";

/// Tolerations implied at bind time: we bind to not-ready nodes
/// intentionally, so the two standard not-ready taints never defer a pod.
fn not_ready_tolerations() -> Vec<Toleration> {
    vec![
        Toleration::exists(NOT_READY_TAINT_KEY, Some(TaintEffect::NoSchedule)),
        Toleration::exists(NODE_NOT_READY_TAINT_KEY, Some(TaintEffect::NoSchedule)),
    ]
}

/// Aggregate requests of the daemon pods that will land on a node of
/// this provisioner: daemons must tolerate the provisioner's static
/// taints and be compatible with its requirements. Startup taints do not
/// filter here; they are gone by the time daemons arrive.
pub fn daemon_overhead(spec: &ProvisionerSpec, daemon_sets: &[DaemonSetSpec]) -> Resources {
    let provisioner_requirements = match Requirements::try_from_iter(&spec.requirements) {
        Ok(requirements) => requirements,
        Err(_) => return Resources::new(),
    };
    let mut overhead = Resources::new();
    for daemon_set in daemon_sets {
        let template = &daemon_set.template;
        if untolerated(&spec.taints, &template.tolerations, &[]).is_some() {
            continue;
        }
        let Ok(daemon_requirements) = Requirements::try_from_iter(&template.node_requirements)
        else {
            continue;
        };
        if provisioner_requirements.compatible(&daemon_requirements).is_err() {
            continue;
        }
        overhead.add(&template.requests);
    }
    overhead
}

/// Shared dependencies of a pass, cloned into the per-node launch tasks.
struct PassContext {
    store: ClusterStore,
    cloud: Arc<dyn CloudProvider>,
    cluster: Arc<Cluster>,
    recorder: Arc<dyn EventRecorder>,
    metrics: Arc<MetricsRegistry>,
}

/// The provisioning loop: waits for batched pods, creates capacity, and
/// binds the pods to it.
pub struct Provisioner {
    ctx: Arc<PassContext>,
    batcher: Arc<Batcher>,
    volume_topology: VolumeTopology,
    passes: watch::Sender<u64>,
}

impl Provisioner {
    pub fn new(
        store: ClusterStore,
        cloud: Arc<dyn CloudProvider>,
        cluster: Arc<Cluster>,
        batcher: Arc<Batcher>,
        recorder: Arc<dyn EventRecorder>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let volume_topology = VolumeTopology::new(store.clone());
        let (passes, _) = watch::channel(0);
        Self {
            ctx: Arc::new(PassContext {
                store,
                cloud,
                cluster,
                recorder,
                metrics,
            }),
            batcher,
            volume_topology,
            passes,
        }
    }

    /// Request a pass; non-blocking.
    pub fn trigger(&self) {
        self.batcher.trigger();
    }

    /// Subscribe to the pass counter; it increments after every pass,
    /// successful or not.
    pub fn completions(&self) -> watch::Receiver<u64> {
        self.passes.subscribe()
    }

    /// Test hook: skip the batching window and wait for the pass to
    /// finish.
    pub async fn trigger_immediate_and_wait(&self) {
        let mut completions = self.completions();
        self.batcher.trigger_immediate();
        let _ = completions.changed().await;
    }

    /// Drive passes until shutdown. Per-pass errors are logged and the
    /// next trigger retries; only the shutdown channel stops the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("waiting for unschedulable pods");
        loop {
            let Some(window) = self.batcher.wait(&mut shutdown).await else {
                break;
            };
            if let Err(err) = self.provision(window, &mut shutdown).await {
                error!(error = %err, "provisioning failed");
            }
            self.passes.send_modify(|count| *count += 1);
            if *shutdown.borrow() {
                break;
            }
        }
        info!("stopped provisioner");
    }

    /// One batch → schedule → launch → bind pass.
    async fn provision(
        &self,
        window: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ProvisionResult<()> {
        let pods = self.provisionable_pods()?;
        if pods.is_empty() {
            return Ok(());
        }
        info!(
            pods = pods.len(),
            window_ms = window.as_millis() as u64,
            "batched pods"
        );

        let provisioners = self.load_provisioners().await?;
        let provisioner_names: Vec<String> =
            provisioners.iter().map(|p| p.spec.name.clone()).collect();
        let snapshot = self.ctx.cluster.snapshot();
        let topology = {
            let requirement_refs: Vec<&Requirements> =
                provisioners.iter().map(|p| &p.requirements).collect();
            Topology::new(&snapshot, &requirement_refs, &pods)
        };

        let solve_started = Instant::now();
        let scheduler = Scheduler::new(provisioners, topology, self.ctx.recorder.clone());
        let nodes = scheduler.solve(&pods)?;
        let solve_seconds = solve_started.elapsed().as_secs_f64();
        for name in &provisioner_names {
            self.ctx.metrics.observe_scheduling(name, solve_seconds);
        }

        // Launch capacity and bind pods; fan-out bounded by node count,
        // and one node's failure never aborts its siblings. Shutdown
        // aborts the remaining launches without undoing capacity already
        // created; the next pass observes and keeps it.
        let mut launches = JoinSet::new();
        for node in nodes {
            let ctx = self.ctx.clone();
            launches.spawn(async move {
                let provisioner = node.provisioner.clone();
                if let Err(err) = launch(ctx, node).await {
                    error!(%provisioner, error = %err, "launching node failed");
                }
            });
        }
        loop {
            tokio::select! {
                joined = launches.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    warn!(remaining = launches.len(), "pass cancelled; aborting remaining launches");
                    launches.abort_all();
                    break;
                }
            }
        }
        Ok(())
    }

    /// Unassigned pods with an open scheduling gate and valid claims,
    /// with claim-derived zone requirements injected.
    fn provisionable_pods(&self) -> ProvisionResult<Vec<PodSpec>> {
        let mut out = Vec::new();
        for pod in self.ctx.store.list_pods()? {
            if !pod.is_provisionable() {
                continue;
            }
            match self.volume_topology.requirements_for(&pod) {
                Ok(claim_requirements) => {
                    let mut pod = pod;
                    pod.node_requirements.extend(claim_requirements);
                    out.push(pod);
                }
                Err(ProvisionError::Validation(reason)) => {
                    debug!(pod = %pod.table_key(), %reason, "unable to batch pod");
                    self.ctx
                        .recorder
                        .pod_failed_validation(&pod.table_key(), &reason);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// Load provisioner specs and assemble each with its provider's
    /// announced requirements, instance types and daemon overhead.
    async fn load_provisioners(&self) -> ProvisionResult<Vec<LoadedProvisioner>> {
        let specs = self.ctx.store.list_provisioners()?;
        let daemon_sets = self.ctx.store.list_daemon_sets()?;

        let mut out = Vec::new();
        for spec in specs {
            let cloud_requirements = self.ctx.cloud.get_requirements(&spec.provider).await?;
            let instance_types = self.ctx.cloud.get_instance_types(&spec.provider).await?;
            let overhead = daemon_overhead(&spec, &daemon_sets);
            let name = spec.name.clone();
            match LoadedProvisioner::assemble(spec, &cloud_requirements, instance_types, overhead)
            {
                Ok(loaded) => out.push(loaded),
                Err(err) => {
                    warn!(provisioner = %name, error = %err, "skipping contradictory provisioner");
                }
            }
        }
        if out.is_empty() {
            return Err(ProvisionError::NoProvisioners);
        }
        Ok(out)
    }
}

/// Launch one synthetic node: limits check, provider create, overlay,
/// idempotent registration, bind.
async fn launch(ctx: Arc<PassContext>, node: SyntheticNode) -> ProvisionResult<()> {
    let provisioner_name = node.provisioner.clone();

    // Re-read the provisioner: limits apply to the state of the world at
    // launch time, not at solve time.
    let latest = ctx
        .store
        .get_provisioner(&provisioner_name)?
        .ok_or_else(|| ProvisionError::ProvisionerNotFound(provisioner_name.clone()))?;

    let usage = ctx.cluster.snapshot().provisioner_usage(&provisioner_name);
    let estimate = node
        .instance_type_options
        .first()
        .map(|it| it.allocatable())
        .unwrap_or_default();
    if let Err(exceeded) = latest.limits.exceeded_by(&usage.plus(&estimate)) {
        ctx.recorder
            .provisioner_limit_exceeded(&provisioner_name, &exceeded.to_string());
        info!(
            provisioner = %provisioner_name,
            pods = node.pods.len(),
            %exceeded,
            "launch aborted by limits; pods deferred"
        );
        return Ok(());
    }

    // Both the taints and the startup taints go onto the node.
    let mut taints = latest.taints.clone();
    taints.extend(latest.startup_taints.iter().cloned());
    let created = ctx
        .cloud
        .create(NodeRequest {
            instance_type_options: node.instance_type_options.clone(),
            template: NodeTemplate {
                provider: latest.provider.clone(),
                labels: latest.labels.clone(),
                taints,
                requirements: node.requirements.clone(),
                kubelet: latest.kubelet.clone(),
            },
        })
        .await?;

    let merged = merge_node(created, &latest);
    // Nodes can come online and self-register before we do; enforcing
    // the binding decision only needs the object to exist.
    match ctx.store.create_node(&merged) {
        Err(err) if err.is_already_exists() => {
            debug!(node = %merged.name, "node already registered");
        }
        other => other?,
    }
    info!(
        node = %merged.name,
        provisioner = %provisioner_name,
        pods = node.pods.len(),
        "created node"
    );

    bind(&ctx, &merged, node.pods, &provisioner_name).await;
    Ok(())
}

/// Bind pods to a registered node in parallel. Pods that would be
/// evicted straight away (they do not tolerate the node's taints beyond
/// the implied not-ready set) are deferred with an event instead.
async fn bind(ctx: &Arc<PassContext>, node: &NodeRecord, pods: Vec<PodSpec>, provisioner: &str) {
    let started = Instant::now();
    let implied = not_ready_tolerations();

    let mut bindings = JoinSet::new();
    for pod in pods {
        if untolerated(&node.taints, &pod.tolerations, &implied).is_some() {
            ctx.recorder
                .pod_should_schedule(&pod.table_key(), Some(&node.name));
            continue;
        }
        let store = ctx.store.clone();
        let node_name = node.name.clone();
        bindings.spawn(async move {
            if let Err(err) = store.bind_pod(&pod.table_key(), &node_name) {
                error!(
                    pod = %pod.table_key(),
                    node = %node_name,
                    error = %err,
                    "failed to bind pod"
                );
            }
        });
    }
    while bindings.join_next().await.is_some() {}

    ctx.metrics
        .observe_bind(provisioner, started.elapsed().as_secs_f64());
}
