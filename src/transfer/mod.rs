//! Transfers move one resource from a source registry to a destination
//!
//! One [`TransferFactory`] is registered per [`ResourceType`]. Transfers must
//! consult their [`StopChecker`] before and between network operations and
//! return [`ReplicationError::JobStopped`] once a stop was requested.

use crate::common::KeyedRegistry;
use crate::error::{ReplicationError, Result};
use crate::job::{JobLogger, StopChecker};
use crate::model::{Resource, ResourceType};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Transfer: Send + Sync {
    /// Copies `src` to `dst`, or removes `dst` when it is marked deleted
    async fn transfer(&self, src: &Resource, dst: &Resource) -> Result<()>;
}

pub trait TransferFactory: Send + Sync {
    fn create(&self, logger: JobLogger, should_stop: StopChecker) -> Result<Box<dyn Transfer>>;
}

/// Returns [`ReplicationError::JobStopped`] when a stop was requested
pub fn check_stop(should_stop: &StopChecker) -> Result<()> {
    if should_stop() {
        Err(ReplicationError::JobStopped)
    } else {
        Ok(())
    }
}

/// Resource type to transfer factory
pub struct TransferRegistry {
    factories: KeyedRegistry<ResourceType, Arc<dyn TransferFactory>>,
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            factories: KeyedRegistry::new("transfer factory"),
        }
    }

    pub fn register(
        &mut self,
        resource_type: ResourceType,
        factory: Arc<dyn TransferFactory>,
    ) -> Result<()> {
        self.factories.register(resource_type, factory)?;
        tracing::info!(resource_type = %resource_type, "transfer factory registered");
        Ok(())
    }

    pub fn factory(&self, resource_type: ResourceType) -> Result<&Arc<dyn TransferFactory>> {
        self.factories.get(&resource_type)
    }
}
