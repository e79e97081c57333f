//! The watch pump.
//!
//! One subscription on the cluster store feeds two consumers: the
//! in-memory mirror, and the batcher — every upsert of an unassigned,
//! ungated pod requests a provisioning pass.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use gantry_provision::Batcher;
use gantry_state::{Cluster, WatchEvent};

/// Apply store events to the mirror and trigger the batcher for newly
/// provisionable pods, until shutdown.
pub async fn run_watch_pump(
    cluster: Arc<Cluster>,
    batcher: Arc<Batcher>,
    mut events: broadcast::Receiver<WatchEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    cluster.apply(&event);
                    if let WatchEvent::PodUpserted(pod) = &event {
                        if pod.is_provisionable() {
                            debug!(pod = %pod.table_key(), "unschedulable pod observed");
                            batcher.trigger();
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "watch pump lagged; triggering a catch-up pass");
                    batcher.trigger();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("watch pump stopped");
}
