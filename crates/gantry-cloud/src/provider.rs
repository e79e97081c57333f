//! The cloud-provider trait.

use std::collections::BTreeMap;

use async_trait::async_trait;

use gantry_core::{Requirement, Requirements, Taint};
use gantry_state::{KubeletConfig, NodeRecord, ProviderPayload};

use crate::error::CloudResult;
use crate::instance_type::InstanceType;

/// The desired shape of a node, handed to a provider at launch.
#[derive(Debug, Clone)]
pub struct NodeTemplate {
    pub provider: ProviderPayload,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    pub requirements: Requirements,
    pub kubelet: Option<KubeletConfig>,
}

/// A launch request: acceptable instance types (best first) plus the node
/// template. The provider picks among the options, absorbing price and
/// availability changes between scheduling and launch.
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub instance_type_options: Vec<InstanceType>,
    pub template: NodeTemplate,
}

/// A machine-infrastructure adapter.
///
/// `create` must be safe for the caller to retry: the caller treats an
/// already-registered node object as success.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider-announced constraints for a payload (e.g. supported
    /// zones).
    async fn get_requirements(&self, payload: &ProviderPayload) -> CloudResult<Vec<Requirement>>;

    /// The finite set of instance types a payload may launch.
    async fn get_instance_types(&self, payload: &ProviderPayload)
    -> CloudResult<Vec<InstanceType>>;

    /// Launch capacity and return the concrete node identity.
    async fn create(&self, request: NodeRequest) -> CloudResult<NodeRecord>;
}
