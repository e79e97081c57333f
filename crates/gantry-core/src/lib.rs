//! gantry-core — domain algebra shared by every Gantry crate.
//!
//! Provides the pieces the provisioner reasons with:
//!
//! - **`resources`** — deterministic resource vectors (cpu, memory, pods,
//!   extended resources) with fit checks
//! - **`requirements`** — the label-selector constraint algebra with
//!   set-algebraic intersection and well-known key handling
//! - **`taints`** — taints and tolerations with admission checks
//! - **`config`** — the `gantry.toml` daemon configuration

pub mod config;
pub mod error;
pub mod requirements;
pub mod resources;
pub mod taints;

pub use config::GantryConfig;
pub use error::{CoreError, CoreResult};
pub use requirements::{Operator, Requirement, Requirements, ValueSet};
pub use resources::Resources;
pub use taints::{Taint, TaintEffect, Toleration, TolerationOperator};
