//! Registry adapters
//!
//! An [`Adapter`] is the client-side view of one registry: what it supports,
//! whether it is reachable, and which resources it holds. Adapters are built
//! per registry by an [`AdapterFactory`] looked up by [`RegistryType`] in an
//! [`AdapterRegistry`].

pub mod native;

use crate::common::KeyedRegistry;
use crate::error::{ReplicationError, Result};
use crate::model::{Filter, FilterType, Registry, RegistryType, Resource, ResourceType, TriggerType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a filter is entered for a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterStyleType {
    Input,
    Radio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStyle {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub style: FilterStyleType,
    #[serde(default)]
    pub values: Vec<String>,
}

impl FilterStyle {
    pub fn input(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            style: FilterStyleType::Input,
            values: Vec::new(),
        }
    }
}

/// What an adapter advertises about its registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryInfo {
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    #[serde(default)]
    pub description: String,
    pub supported_resource_types: Vec<ResourceType>,
    #[serde(default)]
    pub supported_resource_filters: Vec<FilterStyle>,
    #[serde(default)]
    pub supported_triggers: Vec<TriggerType>,
}

impl RegistryInfo {
    pub fn supports_filter(&self, filter_type: FilterType) -> bool {
        self.supported_resource_filters
            .iter()
            .any(|style| style.filter_type == filter_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Capability contract every registry adapter implements.
///
/// `fetch_artifacts` and `fetch_charts` receive the policy filters so an
/// adapter can prune server-side; callers filter again client-side, so an
/// adapter may ignore them.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn info(&self) -> Result<RegistryInfo>;

    async fn health_check(&self) -> Result<HealthStatus>;

    /// Makes sure the destination can receive `resources`, e.g. creates namespaces
    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()>;

    async fn fetch_artifacts(&self, _filters: &[Filter]) -> Result<Vec<Resource>> {
        Err(ReplicationError::Unsupported(
            "the adapter doesn't support fetching artifacts".to_string(),
        ))
    }

    async fn fetch_charts(&self, _filters: &[Filter]) -> Result<Vec<Resource>> {
        Err(ReplicationError::Unsupported(
            "the adapter doesn't support fetching charts".to_string(),
        ))
    }
}

/// Builds adapters for one registry type
pub trait AdapterFactory: Send + Sync {
    fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>>;
}

/// Registry type to adapter factory
pub struct AdapterRegistry {
    factories: KeyedRegistry<RegistryType, Arc<dyn AdapterFactory>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            factories: KeyedRegistry::new("adapter factory"),
        }
    }

    pub fn register(
        &mut self,
        registry_type: RegistryType,
        factory: Arc<dyn AdapterFactory>,
    ) -> Result<()> {
        self.factories.register(registry_type, factory)?;
        tracing::info!(registry_type = %registry_type, "adapter factory registered");
        Ok(())
    }

    pub fn factory(&self, registry_type: RegistryType) -> Result<&Arc<dyn AdapterFactory>> {
        self.factories
            .get(&registry_type)
            .map_err(|_| ReplicationError::AdapterNotFound(registry_type.to_string()))
    }

    /// Builds the adapter for `registry`
    pub fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        self.factory(registry.registry_type)?.create(registry)
    }

    pub fn registered_types(&self) -> Vec<RegistryType> {
        let mut types: Vec<RegistryType> = self.factories.keys().copied().collect();
        types.sort();
        types
    }
}
