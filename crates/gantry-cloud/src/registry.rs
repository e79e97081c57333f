//! Provider registry.
//!
//! Routes a provisioner's [`ProviderPayload`] to the adapter registered
//! for its variant. The registry itself implements [`CloudProvider`], so
//! the provisioning loop holds exactly one provider handle regardless of
//! how many adapters are installed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use gantry_core::Requirement;
use gantry_state::{NodeRecord, ProviderPayload};

use crate::error::{CloudError, CloudResult};
use crate::instance_type::InstanceType;
use crate::provider::{CloudProvider, NodeRequest};

/// Dispatches provider calls on the payload variant.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, Arc<dyn CloudProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an adapter for a payload kind (e.g. `"static"`, `"aws"`).
    pub fn register(mut self, kind: &'static str, provider: Arc<dyn CloudProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn resolve(&self, payload: &ProviderPayload) -> CloudResult<&Arc<dyn CloudProvider>> {
        self.providers
            .get(payload.kind())
            .ok_or_else(|| CloudError::UnknownProvider(payload.kind().to_string()))
    }
}

#[async_trait]
impl CloudProvider for ProviderRegistry {
    async fn get_requirements(&self, payload: &ProviderPayload) -> CloudResult<Vec<Requirement>> {
        self.resolve(payload)?.get_requirements(payload).await
    }

    async fn get_instance_types(
        &self,
        payload: &ProviderPayload,
    ) -> CloudResult<Vec<InstanceType>> {
        self.resolve(payload)?.get_instance_types(payload).await
    }

    async fn create(&self, request: NodeRequest) -> CloudResult<NodeRecord> {
        self.resolve(&request.template.provider)?.create(request).await
    }
}
