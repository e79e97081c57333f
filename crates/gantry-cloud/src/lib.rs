//! gantry-cloud — the cloud-provider seam.
//!
//! The provisioning core talks to machine infrastructure exclusively
//! through the [`CloudProvider`] trait: enumerate instance types,
//! announce provider constraints, create capacity. Providers are selected
//! per provisioner through the [`registry::ProviderRegistry`], which
//! routes on the provisioner's [`ProviderPayload`] variant without the
//! core ever interpreting its contents.
//!
//! The built-in [`fleet::StaticFleet`] provider serves a fixed catalog of
//! instance types; it backs the standalone daemon and the test suites.

pub mod error;
pub mod fleet;
pub mod instance_type;
pub mod provider;
pub mod registry;

pub use error::{CloudError, CloudResult};
pub use fleet::StaticFleet;
pub use instance_type::{InstanceType, fleet_requirements};
pub use provider::{CloudProvider, NodeRequest, NodeTemplate};
pub use registry::ProviderRegistry;
