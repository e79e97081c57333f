//! gantryd — daemon wiring shared by the binary and its tests.

pub mod api;
pub mod pump;

pub use api::build_router;
pub use pump::run_watch_pump;
