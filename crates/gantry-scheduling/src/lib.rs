//! gantry-scheduling — the bin-packing scheduler.
//!
//! Turns a heterogeneous set of unschedulable pods plus candidate
//! instance types and topology constraints into concrete node
//! specifications. The solve phase is single-threaded by design: the
//! topology tracker and the open synthetic-node set are not safe to
//! mutate concurrently, and determinism is a hard requirement — two
//! equal input sets must yield identical outputs to prevent oscillation
//! across passes.
//!
//! # Components
//!
//! - **`topology`** — per-domain counts for spread and (anti)affinity
//!   constraints, with reversible record/unrecord
//! - **`instance_types`** — filter and rank candidate instance types
//! - **`scheduler`** — first-fit-decreasing packing into
//!   [`SyntheticNode`]s

pub mod error;
pub mod instance_types;
pub mod scheduler;
pub mod topology;

pub use error::{SchedulingError, SchedulingResult};
pub use instance_types::filter_instance_types;
pub use scheduler::{LoadedProvisioner, Scheduler, SyntheticNode};
pub use topology::{RecordUndo, Topology};
