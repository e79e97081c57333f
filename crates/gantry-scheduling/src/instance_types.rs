//! Instance-type filtering and ranking.

use gantry_cloud::InstanceType;
use gantry_core::resources::{CPU, MEMORY};
use gantry_core::{Requirements, Resources};

/// Keep the instance types whose requirements intersect the node's and
/// whose capacity minus startup overhead still hosts `needed`. The
/// survivors are ranked by price per suitable unit — sticker price
/// divided by how many `needed`-sized workloads the type can host, so a
/// type twice the size at less than twice the price ranks ahead. Ties
/// prefer the larger remaining headroom (less future fragmentation),
/// then the name for determinism.
pub fn filter_instance_types(
    types: &[InstanceType],
    requirements: &Requirements,
    needed: &Resources,
) -> Vec<InstanceType> {
    let mut kept: Vec<InstanceType> = types
        .iter()
        .filter(|it| requirements.compatible(&it.requirements).is_ok())
        .filter(|it| needed.fits(&it.allocatable()))
        .cloned()
        .collect();

    kept.sort_by(|a, b| {
        price_per_unit(a, needed)
            .partial_cmp(&price_per_unit(b, needed))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| headroom(b, needed).cmp(&headroom(a, needed)))
            .then_with(|| a.name.cmp(&b.name))
    });
    kept
}

/// Price normalized by the number of `needed`-sized workloads the type
/// hosts. Every kept type hosts at least one.
fn price_per_unit(it: &InstanceType, needed: &Resources) -> f64 {
    it.price / suitable_units(it, needed) as f64
}

/// How many copies of the required vector fit into the allocatable
/// capacity: the binding dimension decides. A zero requirement vector
/// counts as one unit.
fn suitable_units(it: &InstanceType, needed: &Resources) -> i64 {
    let allocatable = it.allocatable();
    needed
        .iter()
        .filter(|(_, quantity)| *quantity > 0)
        .map(|(name, quantity)| allocatable.get(name) / quantity)
        .min()
        .unwrap_or(1)
        .max(1)
}

/// Scalar headroom left after hosting the workload: CPU first, memory as
/// the tie-breaker dimension.
fn headroom(it: &InstanceType, needed: &Resources) -> (i64, i64) {
    let free = it.allocatable().saturating_sub(needed);
    (free.get(CPU), free.get(MEMORY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_cloud::fleet::make_type;
    use gantry_core::Requirement;
    use gantry_core::requirements::keys;

    fn zones() -> Vec<String> {
        vec!["a".into(), "b".into()]
    }

    fn fleet() -> Vec<InstanceType> {
        vec![
            make_type("m5.large", 2000, 8 << 30, 0, 0.096, "amd64", &zones()),
            make_type("m5.xlarge", 4000, 16 << 30, 0, 0.192, "amd64", &zones()),
            make_type("m5.2xlarge", 8000, 32 << 30, 0, 0.384, "amd64", &zones()),
            make_type("p3.2xlarge", 8000, 61 << 30, 1, 3.06, "amd64", &zones()),
        ]
    }

    #[test]
    fn ranks_by_price_per_suitable_unit() {
        // A 1-CPU workload: the large hosts 1 (1900m free), the xlarge 3,
        // the 2xlarge 7 — at linear sticker prices the bigger shapes are
        // cheaper per workload. The GPU type pays for silicon the
        // workload never uses.
        let kept = filter_instance_types(
            &fleet(),
            &Requirements::new(),
            &Resources::new().cpu_millis(1000),
        );
        let names: Vec<&str> = kept.iter().map(|it| it.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["m5.2xlarge", "m5.xlarge", "m5.large", "p3.2xlarge"]
        );
    }

    #[test]
    fn workload_sized_to_the_type_ranks_by_sticker_price() {
        // Once the workload nearly fills every shape (one unit each),
        // per-unit price degenerates to sticker price.
        let needed = Resources::new().cpu_millis(6000).memory_bytes(20 << 30);
        let kept = filter_instance_types(&fleet(), &Requirements::new(), &needed);
        let names: Vec<&str> = kept.iter().map(|it| it.name.as_str()).collect();
        assert_eq!(names, vec!["m5.2xlarge", "p3.2xlarge"]);
    }

    #[test]
    fn units_count_the_binding_dimension() {
        let it = make_type("m5.xlarge", 4000, 16 << 30, 0, 0.192, "amd64", &zones());
        // CPU-bound: 3900m free hosts three 1-CPU workloads.
        assert_eq!(
            suitable_units(&it, &Resources::new().cpu_millis(1000)),
            3
        );
        // Memory-bound: ~15.9Gi free hosts one 8Gi workload.
        assert_eq!(
            suitable_units(
                &it,
                &Resources::new().cpu_millis(100).memory_bytes(8 << 30)
            ),
            1
        );
        // Empty vector counts as a single unit.
        assert_eq!(suitable_units(&it, &Resources::new()), 1);
    }

    #[test]
    fn capacity_filter_drops_small_types() {
        let needed = Resources::new().cpu_millis(6000).memory_bytes(20 << 30);
        let kept = filter_instance_types(&fleet(), &Requirements::new(), &needed);
        assert!(kept.iter().all(|it| it.name.ends_with("2xlarge")));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn overhead_counts_against_capacity() {
        // m5.large has 2000m minus 100m overhead: a 1950m pod no longer
        // fits even though raw capacity would.
        let needed = Resources::new().cpu_millis(1950);
        let kept = filter_instance_types(&fleet(), &Requirements::new(), &needed);
        assert!(!kept.is_empty());
        assert!(kept.iter().all(|it| it.name != "m5.large"));
    }

    #[test]
    fn requirements_filter_by_instance_type_key() {
        let reqs = Requirements::try_from_iter(&[Requirement::within(
            keys::INSTANCE_TYPE,
            &["m5.xlarge"],
        )])
        .unwrap();
        let kept = filter_instance_types(&fleet(), &reqs, &Resources::new());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "m5.xlarge");
    }

    #[test]
    fn gpu_requests_filter_to_gpu_types() {
        let needed = Resources::new().gpus(1);
        let kept = filter_instance_types(&fleet(), &Requirements::new(), &needed);
        let names: Vec<&str> = kept.iter().map(|it| it.name.as_str()).collect();
        assert_eq!(names, vec!["p3.2xlarge"]);
    }

    #[test]
    fn empty_result_when_nothing_fits() {
        let needed = Resources::new().cpu_millis(1 << 20);
        assert!(filter_instance_types(&fleet(), &Requirements::new(), &needed).is_empty());
    }

    #[test]
    fn per_unit_ties_prefer_headroom_then_name() {
        // Same CPU, same price: equal units for a CPU-bound workload, so
        // the memory headroom decides.
        let zones = zones();
        let small = make_type("tie.small", 2000, 8 << 30, 0, 0.1, "amd64", &zones);
        let roomy = make_type("tie.roomy", 2000, 16 << 30, 0, 0.1, "amd64", &zones);
        let kept = filter_instance_types(
            &[small, roomy],
            &Requirements::new(),
            &Resources::new().cpu_millis(500),
        );
        assert_eq!(kept[0].name, "tie.roomy");
    }
}
