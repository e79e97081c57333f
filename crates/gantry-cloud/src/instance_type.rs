//! Instance type descriptors.
//!
//! An [`InstanceType`] is what a provider can launch: a requirements set
//! advertising where and what it is (architecture, zones, capacity type,
//! GPU family), a capacity vector, the startup overhead reserved for the
//! system and kubelet, and a price.

use std::collections::BTreeSet;

use gantry_core::requirements::keys;
use gantry_core::{Requirement, Requirements, Resources};

/// A launchable machine shape, as advertised by a provider.
#[derive(Debug, Clone)]
pub struct InstanceType {
    pub name: String,
    /// What the type offers: architecture, zones, capacity type, etc.
    pub requirements: Requirements,
    pub capacity: Resources,
    /// System + kubelet reservation subtracted from capacity.
    pub overhead: Resources,
    /// Price per hour in arbitrary units; used for ranking only.
    pub price: f64,
}

impl InstanceType {
    /// Capacity left for pods after the startup overhead.
    pub fn allocatable(&self) -> Resources {
        self.capacity.saturating_sub(&self.overhead)
    }
}

/// The requirements a whole fleet advertises: for each well-known key,
/// the union of values offered by any type. Narrowing a provisioner with
/// these confines scheduling to what the fleet can actually launch.
pub fn fleet_requirements(types: &[InstanceType]) -> Vec<Requirement> {
    let mut out = Vec::new();
    for key in keys::WELL_KNOWN {
        let mut union: BTreeSet<String> = BTreeSet::new();
        let mut finite = true;
        for it in types {
            match it.requirements.values(key).catalog() {
                Some(catalog) => union.extend(catalog.iter().cloned()),
                // A type without a finite constraint offers anything.
                None => finite = false,
            }
        }
        if finite && !union.is_empty() {
            let values: Vec<&str> = union.iter().map(|s| s.as_str()).collect();
            out.push(Requirement::within(key, &values));
        }
    }
    out
}
