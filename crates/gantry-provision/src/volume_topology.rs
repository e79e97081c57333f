//! Volume topology.
//!
//! Persistent claims pin their consumers: a Bound claim whose backing
//! volume lives in a zone injects that zone into the pod's requirements
//! before scheduling. Pods referencing a claim that is missing or still
//! Pending fail validation and sit out the pass; the claim controller
//! will bind it and the pod returns with the next trigger.

use tracing::debug;

use gantry_core::Requirement;
use gantry_core::requirements::keys;
use gantry_state::{ClaimPhase, ClusterStore, PodSpec};

use crate::error::{ProvisionError, ProvisionResult};

/// Resolves claim-derived requirements for pods.
#[derive(Clone)]
pub struct VolumeTopology {
    store: ClusterStore,
}

impl VolumeTopology {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    /// The zone requirements the pod's claims impose.
    ///
    /// `Validation` errors mean the pod is skipped for this pass; store
    /// errors abort the pass.
    pub fn requirements_for(&self, pod: &PodSpec) -> ProvisionResult<Vec<Requirement>> {
        let mut out = Vec::new();
        for claim_name in &pod.volume_claims {
            let key = format!("{}/{}", pod.namespace, claim_name);
            let claim = self.store.get_claim(&key)?.ok_or_else(|| {
                ProvisionError::Validation(format!("claim {key} not found"))
            })?;
            match claim.phase {
                ClaimPhase::Pending => {
                    return Err(ProvisionError::Validation(format!(
                        "claim {key} is not bound"
                    )));
                }
                ClaimPhase::Bound => {
                    if let Some(zone) = &claim.zone {
                        debug!(pod = %pod.table_key(), claim = %key, %zone, "claim pins zone");
                        out.push(Requirement::within(keys::ZONE, &[zone]));
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_state::PersistentClaim;

    fn pod_with_claims(claims: &[&str]) -> PodSpec {
        PodSpec {
            namespace: "default".into(),
            name: "web-0".into(),
            labels: Default::default(),
            requests: Default::default(),
            node_requirements: Vec::new(),
            tolerations: Vec::new(),
            topology_spread: Vec::new(),
            affinities: Vec::new(),
            volume_claims: claims.iter().map(|c| c.to_string()).collect(),
            scheduling_gated: false,
            node_name: None,
        }
    }

    #[test]
    fn zoned_claim_pins_pod() {
        let store = ClusterStore::open_in_memory().unwrap();
        store
            .put_claim(&PersistentClaim {
                namespace: "default".into(),
                name: "data".into(),
                phase: ClaimPhase::Bound,
                zone: Some("us-east-1b".into()),
            })
            .unwrap();

        let topology = VolumeTopology::new(store);
        let reqs = topology.requirements_for(&pod_with_claims(&["data"])).unwrap();
        assert_eq!(
            reqs,
            vec![Requirement::within(keys::ZONE, &["us-east-1b"])]
        );
    }

    #[test]
    fn bound_claim_without_zone_adds_nothing() {
        let store = ClusterStore::open_in_memory().unwrap();
        store
            .put_claim(&PersistentClaim {
                namespace: "default".into(),
                name: "scratch".into(),
                phase: ClaimPhase::Bound,
                zone: None,
            })
            .unwrap();

        let topology = VolumeTopology::new(store);
        assert!(topology
            .requirements_for(&pod_with_claims(&["scratch"]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn pending_claim_fails_validation() {
        let store = ClusterStore::open_in_memory().unwrap();
        store
            .put_claim(&PersistentClaim {
                namespace: "default".into(),
                name: "waiting".into(),
                phase: ClaimPhase::Pending,
                zone: Some("us-east-1b".into()),
            })
            .unwrap();

        let topology = VolumeTopology::new(store);
        let err = topology
            .requirements_for(&pod_with_claims(&["waiting"]))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn missing_claim_is_a_validation_failure() {
        let store = ClusterStore::open_in_memory().unwrap();
        let topology = VolumeTopology::new(store);

        let err = topology
            .requirements_for(&pod_with_claims(&["ghost"]))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn no_claims_no_requirements() {
        let store = ClusterStore::open_in_memory().unwrap();
        let topology = VolumeTopology::new(store);
        assert!(topology
            .requirements_for(&pod_with_claims(&[]))
            .unwrap()
            .is_empty());
    }
}
