//! gantry-state — cluster object model and state access for Gantry.
//!
//! Backed by [redb](https://docs.rs/redb), the [`ClusterStore`] provides
//! typed CRUD over pods, nodes, provisioners, daemon sets and persistent
//! claims, plus a broadcast watch stream of mutations. The
//! [`mirror::Cluster`] consumes that stream into an in-memory view whose
//! immutable snapshots the scheduler reads lock-free.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{namespace}/{name}`, node names) enable direct gets.
//! The `ClusterStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks. Scheduling
//! decisions are never persisted; on restart the provisioner rebuilds its
//! view from the store.

pub mod error;
pub mod events;
pub mod mirror;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use events::{CapturingRecorder, Event, EventRecorder, TracingRecorder};
pub use mirror::{Cluster, ClusterNode, ClusterSnapshot, MirrorPod};
pub use store::{ClusterStore, WatchEvent};
pub use types::*;
