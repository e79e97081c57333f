//! gantry-provision — the provisioning loop.
//!
//! A single logical consumer drives batch → schedule → launch → bind:
//! the [`Batcher`] coalesces bursts of unschedulable pods into one pass,
//! the [`Provisioner`] lists provisionable pods, asks the scheduler to
//! solve, launches each resulting synthetic node through the cloud
//! provider with a bounded fan-out, and binds pods to the registered
//! node objects before they are Ready.
//!
//! Failure policy: errors within one synthetic node never abort its
//! siblings, per-pass errors never exit the loop, and only shutdown
//! stops the driver. Pods left behind reappear in the next pass.

pub mod batcher;
pub mod error;
pub mod overlay;
pub mod provisioner;
pub mod volume_topology;

pub use batcher::Batcher;
pub use error::{ProvisionError, ProvisionResult};
pub use overlay::merge_node;
pub use provisioner::{Provisioner, daemon_overhead};
pub use volume_topology::VolumeTopology;
