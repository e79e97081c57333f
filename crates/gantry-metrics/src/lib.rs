//! gantry-metrics — observability for the provisioning loop.
//!
//! Tracks per-provisioner latency histograms (scheduling and bind
//! phases) and renders them in Prometheus text exposition format for the
//! daemon's `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! MetricsRegistry
//!   ├── observe_scheduling(provisioner, seconds)
//!   ├── observe_bind(provisioner, seconds)
//!   └── render() → text/plain for /metrics
//! ```
//!
//! Histograms are the only state shared across components; they use
//! atomics internally, so observers never contend with the render path.

pub mod histogram;
pub mod prometheus;
pub mod registry;

pub use histogram::{DURATION_BUCKETS, Histogram};
pub use prometheus::render_prometheus;
pub use registry::MetricsRegistry;
