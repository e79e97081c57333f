//! Per-provisioner histogram registry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::histogram::Histogram;

/// Holds the provisioner-labelled latency histograms.
///
/// The map is keyed deterministically so the render output is stable;
/// individual histograms are atomic, so observation never holds the map
/// lock beyond the lookup.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    scheduling: Mutex<BTreeMap<String, Arc<Histogram>>>,
    bind: Mutex<BTreeMap<String, Arc<Histogram>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn histogram(
        series: &Mutex<BTreeMap<String, Arc<Histogram>>>,
        provisioner: &str,
    ) -> Arc<Histogram> {
        let mut map = series.lock().expect("metrics lock poisoned");
        map.entry(provisioner.to_string())
            .or_insert_with(|| Arc::new(Histogram::new()))
            .clone()
    }

    /// Record one solve duration for a provisioner.
    pub fn observe_scheduling(&self, provisioner: &str, seconds: f64) {
        Self::histogram(&self.scheduling, provisioner).observe(seconds);
    }

    /// Record one per-node bind-phase duration for a provisioner.
    pub fn observe_bind(&self, provisioner: &str, seconds: f64) {
        Self::histogram(&self.bind, provisioner).observe(seconds);
    }

    pub(crate) fn scheduling_series(&self) -> Vec<(String, Arc<Histogram>)> {
        let map = self.scheduling.lock().expect("metrics lock poisoned");
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub(crate) fn bind_series(&self) -> Vec<(String, Arc<Histogram>)> {
        let map = self.bind.lock().expect("metrics lock poisoned");
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_are_keyed_by_provisioner() {
        let registry = MetricsRegistry::new();
        registry.observe_scheduling("default", 0.1);
        registry.observe_scheduling("default", 0.2);
        registry.observe_scheduling("gpu", 1.0);
        registry.observe_bind("default", 0.05);

        let scheduling = registry.scheduling_series();
        assert_eq!(scheduling.len(), 2);
        assert_eq!(scheduling[0].0, "default");
        assert_eq!(scheduling[0].1.count(), 2);
        assert_eq!(scheduling[1].0, "gpu");

        assert_eq!(registry.bind_series().len(), 1);
    }
}
