//! Prometheus text exposition format.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::histogram::Histogram;
use crate::registry::MetricsRegistry;

/// Render the registry's histograms into Prometheus text format.
pub fn render_prometheus(registry: &MetricsRegistry) -> String {
    let mut out = String::new();
    render_histogram_family(
        &mut out,
        "gantry_scheduling_duration_seconds",
        "Duration of the scheduling (solve) phase in seconds.",
        &registry.scheduling_series(),
    );
    render_histogram_family(
        &mut out,
        "gantry_bind_duration_seconds",
        "Duration of the per-node bind phase in seconds.",
        &registry.bind_series(),
    );
    out
}

fn render_histogram_family(
    out: &mut String,
    name: &str,
    help: &str,
    series: &[(String, Arc<Histogram>)],
) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} histogram");
    for (provisioner, histogram) in series {
        let (buckets, total) = histogram.cumulative();
        for (bound, count) in buckets {
            let _ = writeln!(
                out,
                "{name}_bucket{{provisioner=\"{provisioner}\",le=\"{bound}\"}} {count}"
            );
        }
        let _ = writeln!(
            out,
            "{name}_bucket{{provisioner=\"{provisioner}\",le=\"+Inf\"}} {total}"
        );
        let _ = writeln!(
            out,
            "{name}_sum{{provisioner=\"{provisioner}\"}} {:.6}",
            histogram.sum_seconds()
        );
        let _ = writeln!(
            out,
            "{name}_count{{provisioner=\"{provisioner}\"}} {}",
            histogram.count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_empty_has_type_declarations() {
        let registry = MetricsRegistry::new();
        let output = render_prometheus(&registry);
        assert!(output.contains("# HELP gantry_scheduling_duration_seconds"));
        assert!(output.contains("# TYPE gantry_bind_duration_seconds histogram"));
    }

    #[test]
    fn render_single_provisioner() {
        let registry = MetricsRegistry::new();
        registry.observe_scheduling("default", 0.03);
        registry.observe_bind("default", 0.2);

        let output = render_prometheus(&registry);
        assert!(output.contains(
            "gantry_scheduling_duration_seconds_bucket{provisioner=\"default\",le=\"0.05\"} 1"
        ));
        assert!(output.contains(
            "gantry_scheduling_duration_seconds_bucket{provisioner=\"default\",le=\"+Inf\"} 1"
        ));
        assert!(output.contains("gantry_scheduling_duration_seconds_count{provisioner=\"default\"} 1"));
        assert!(output.contains("gantry_bind_duration_seconds_count{provisioner=\"default\"} 1"));
    }

    #[test]
    fn render_format_lines_are_well_formed() {
        let registry = MetricsRegistry::new();
        registry.observe_scheduling("default", 0.1);
        let output = render_prometheus(&registry);

        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert!(
                line.contains('{') && line.contains("} "),
                "line should have labels and a value: {line}"
            );
        }
    }

    #[test]
    fn buckets_are_cumulative_in_output() {
        let registry = MetricsRegistry::new();
        registry.observe_scheduling("default", 0.004);
        registry.observe_scheduling("default", 0.04);

        let output = render_prometheus(&registry);
        assert!(output.contains("le=\"0.005\"} 1"));
        assert!(output.contains("le=\"0.05\"} 2"));
        assert!(output.contains("le=\"10\"} 2"));
    }
}
