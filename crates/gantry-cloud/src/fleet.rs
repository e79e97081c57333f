//! Static-fleet provider.
//!
//! Serves a fixed catalog of instance types from a `fleet.toml`
//! definition (or an in-code catalog). Backs the standalone daemon and
//! the test suites: launches are instant and deterministic, which keeps
//! scheduling output reproducible.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use gantry_core::requirements::keys;
use gantry_core::resources::{parse_cpu_millis, parse_memory_bytes};
use gantry_core::{Requirement, Requirements, Resources};
use gantry_state::{NodeRecord, ProviderPayload};

use crate::error::{CloudError, CloudResult};
use crate::instance_type::InstanceType;
use crate::provider::{CloudProvider, NodeRequest};

/// One instance type in a fleet definition file.
#[derive(Debug, Deserialize)]
struct FleetTypeConfig {
    name: String,
    /// CPU quantity, e.g. "2" or "500m".
    cpu: String,
    /// Memory quantity, e.g. "8Gi".
    memory: String,
    #[serde(default = "default_pods")]
    pods: i64,
    #[serde(default)]
    gpus: i64,
    price: f64,
    #[serde(default = "default_arch")]
    arch: String,
    #[serde(default = "default_capacity_types")]
    capacity_types: Vec<String>,
    #[serde(default)]
    overhead_cpu: Option<String>,
    #[serde(default)]
    overhead_memory: Option<String>,
}

fn default_pods() -> i64 {
    110
}

fn default_arch() -> String {
    "amd64".to_string()
}

fn default_capacity_types() -> Vec<String> {
    vec!["on-demand".to_string()]
}

/// A `fleet.toml` file: the zones the fleet spans and its types.
#[derive(Debug, Deserialize)]
struct FleetConfig {
    zones: Vec<String>,
    #[serde(rename = "instance_type")]
    instance_types: Vec<FleetTypeConfig>,
}

/// A provider serving a fixed instance-type catalog.
pub struct StaticFleet {
    zones: Vec<String>,
    types: Vec<InstanceType>,
    sequence: AtomicU64,
}

impl StaticFleet {
    pub fn new(zones: Vec<String>, types: Vec<InstanceType>) -> Self {
        Self {
            zones,
            types,
            sequence: AtomicU64::new(0),
        }
    }

    /// Load a fleet definition from a `fleet.toml` file.
    pub fn from_file(path: &Path) -> CloudResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| CloudError::Fleet(e.to_string()))?;
        let config: FleetConfig =
            toml::from_str(&content).map_err(|e| CloudError::Fleet(e.to_string()))?;
        let fleet = Self::from_config(config)?;
        info!(path = %path.display(), types = fleet.types.len(), "fleet loaded");
        Ok(fleet)
    }

    fn from_config(config: FleetConfig) -> CloudResult<Self> {
        let zones = config.zones;
        let mut types = Vec::new();
        for t in &config.instance_types {
            types.push(build_type(t, &zones)?);
        }
        Ok(Self::new(zones, types))
    }

    /// A small general-purpose catalog used when no fleet file is given.
    pub fn default_fleet(zones: &[&str]) -> Self {
        let zones: Vec<String> = zones.iter().map(|z| z.to_string()).collect();
        let shapes: [(&str, i64, i64, i64, f64); 4] = [
            ("m5.large", 2000, 8 << 30, 0, 0.096),
            ("m5.xlarge", 4000, 16 << 30, 0, 0.192),
            ("m5.2xlarge", 8000, 32 << 30, 0, 0.384),
            ("p3.2xlarge", 8000, 61 << 30, 1, 3.06),
        ];
        let types = shapes
            .iter()
            .map(|(name, cpu, memory, gpus, price)| {
                make_type(name, *cpu, *memory, *gpus, *price, "amd64", &zones)
            })
            .collect();
        Self::new(zones, types)
    }

    fn check_payload(&self, payload: &ProviderPayload) -> CloudResult<()> {
        match payload {
            ProviderPayload::Static { .. } => Ok(()),
            other => Err(CloudError::InvalidPayload(format!(
                "static fleet cannot serve {} payloads",
                other.kind()
            ))),
        }
    }
}

fn build_type(t: &FleetTypeConfig, zones: &[String]) -> CloudResult<InstanceType> {
    let cpu = parse_cpu_millis(&t.cpu).map_err(|e| CloudError::Fleet(e.to_string()))?;
    let memory = parse_memory_bytes(&t.memory).map_err(|e| CloudError::Fleet(e.to_string()))?;
    let overhead_cpu = match &t.overhead_cpu {
        Some(s) => parse_cpu_millis(s).map_err(|e| CloudError::Fleet(e.to_string()))?,
        None => 100,
    };
    let overhead_memory = match &t.overhead_memory {
        Some(s) => parse_memory_bytes(s).map_err(|e| CloudError::Fleet(e.to_string()))?,
        None => 128 << 20,
    };

    let zone_refs: Vec<&str> = zones.iter().map(|z| z.as_str()).collect();
    let capacity_refs: Vec<&str> = t.capacity_types.iter().map(|c| c.as_str()).collect();
    let mut requirements = Requirements::try_from_iter(&[
        Requirement::within(keys::INSTANCE_TYPE, &[&t.name]),
        Requirement::within(keys::ARCH, &[&t.arch]),
        Requirement::within(keys::OS, &["linux"]),
        Requirement::within(keys::ZONE, &zone_refs),
        Requirement::within(keys::CAPACITY_TYPE, &capacity_refs),
    ])
    .map_err(|e| CloudError::Fleet(e.to_string()))?;
    if t.gpus > 0 {
        requirements
            .add(&[Requirement::exists("gantry.dev/gpu-family")])
            .map_err(|e| CloudError::Fleet(e.to_string()))?;
    }

    let mut capacity = Resources::new()
        .cpu_millis(cpu)
        .memory_bytes(memory)
        .pods(t.pods);
    if t.gpus > 0 {
        capacity = capacity.gpus(t.gpus);
    }

    Ok(InstanceType {
        name: t.name.clone(),
        requirements,
        capacity,
        overhead: Resources::new()
            .cpu_millis(overhead_cpu)
            .memory_bytes(overhead_memory),
        price: t.price,
    })
}

/// Build an instance type for in-code catalogs and tests.
pub fn make_type(
    name: &str,
    cpu_millis: i64,
    memory_bytes: i64,
    gpus: i64,
    price: f64,
    arch: &str,
    zones: &[String],
) -> InstanceType {
    let zone_refs: Vec<&str> = zones.iter().map(|z| z.as_str()).collect();
    let mut requirements = Requirements::try_from_iter(&[
        Requirement::within(keys::INSTANCE_TYPE, &[name]),
        Requirement::within(keys::ARCH, &[arch]),
        Requirement::within(keys::OS, &["linux"]),
        Requirement::within(keys::ZONE, &zone_refs),
        Requirement::within(keys::CAPACITY_TYPE, &["on-demand"]),
    ])
    .expect("fresh requirements cannot conflict");
    if gpus > 0 {
        requirements
            .add(&[Requirement::exists("gantry.dev/gpu-family")])
            .expect("exists cannot conflict");
    }

    let mut capacity = Resources::new()
        .cpu_millis(cpu_millis)
        .memory_bytes(memory_bytes)
        .pods(110);
    if gpus > 0 {
        capacity = capacity.gpus(gpus);
    }

    InstanceType {
        name: name.to_string(),
        requirements,
        capacity,
        overhead: Resources::new().cpu_millis(100).memory_bytes(128 << 20),
        price,
    }
}

#[async_trait]
impl CloudProvider for StaticFleet {
    async fn get_requirements(&self, payload: &ProviderPayload) -> CloudResult<Vec<Requirement>> {
        self.check_payload(payload)?;
        let zone_refs: Vec<&str> = self.zones.iter().map(|z| z.as_str()).collect();
        Ok(vec![Requirement::within(keys::ZONE, &zone_refs)])
    }

    async fn get_instance_types(
        &self,
        payload: &ProviderPayload,
    ) -> CloudResult<Vec<InstanceType>> {
        self.check_payload(payload)?;
        Ok(self.types.clone())
    }

    async fn create(&self, request: NodeRequest) -> CloudResult<NodeRecord> {
        self.check_payload(&request.template.provider)?;
        let chosen = request
            .instance_type_options
            .first()
            .ok_or_else(|| CloudError::NoCapacity("no instance type options".to_string()))?;

        // The launcher narrowed the template's zone set; pick the first
        // allowed zone this fleet actually spans.
        let zone = self
            .zones
            .iter()
            .find(|z| request.template.requirements.allows(keys::ZONE, z))
            .ok_or_else(|| CloudError::NoCapacity("no allowed zone".to_string()))?
            .clone();

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = format!("gantry-{}-{sequence:05}", zone);

        let mut labels: BTreeMap<String, String> = request.template.labels.clone();
        // Identity labels the machine reports about itself win over the
        // template.
        for (key, value) in chosen.requirements.labels() {
            labels.insert(key, value);
        }
        labels.insert(keys::INSTANCE_TYPE.to_string(), chosen.name.clone());
        labels.insert(keys::ZONE.to_string(), zone.clone());

        let node = NodeRecord {
            name: name.clone(),
            labels,
            taints: request.template.taints.clone(),
            allocatable: chosen.allocatable(),
            provider_id: Some(format!("static:///{zone}/{name}")),
            ready: false,
        };
        debug!(node = %name, instance_type = %chosen.name, %zone, "fleet node created");
        Ok(node)
    }
}
