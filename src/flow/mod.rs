//! Replication flows
//!
//! A flow turns a policy into the tasks of one execution. The copy flow
//! fetches candidates from the source registry; the deletion flow works on
//! the tombstones it is given.

pub mod copy;
pub mod deletion;
pub mod stage;

use crate::adapter::AdapterRegistry;
use crate::error::Result;
use crate::model::{Policy, Registry, Resource};
use crate::task::ExecutionManager;
use async_trait::async_trait;
use std::sync::Arc;

pub use copy::CopyFlow;
pub use deletion::DeletionFlow;
pub use stage::replace_namespace;

/// Status message of an execution that had nothing to replicate
pub const NO_RESOURCES_MESSAGE: &str = "no resources need to be replicated";

#[async_trait]
pub trait Flow: Send {
    async fn run(&mut self) -> Result<()>;
}

/// What every flow works with
pub struct FlowEnv {
    pub adapters: Arc<AdapterRegistry>,
    pub executions: ExecutionManager,
    /// Stands in for the local side of a policy
    pub local_registry: Registry,
}

/// Picks and runs the flow for one execution
#[derive(Clone)]
pub struct FlowController {
    env: Arc<FlowEnv>,
}

impl FlowController {
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        executions: ExecutionManager,
        local_registry: Registry,
    ) -> Self {
        Self {
            env: Arc::new(FlowEnv {
                adapters,
                executions,
                local_registry,
            }),
        }
    }

    /// Runs the flow for `execution_id`. A deleted `resource` starts the
    /// deletion flow, any other resource is copied instead of fetching.
    pub async fn start(
        &self,
        execution_id: i64,
        policy: &Policy,
        resource: Option<Resource>,
    ) -> Result<()> {
        let policy = stage::resolve_registries(policy, &self.env.local_registry);
        let mut flow: Box<dyn Flow + '_> = match resource {
            Some(resource) if resource.deleted => Box::new(DeletionFlow::new(
                &self.env,
                execution_id,
                &policy,
                vec![resource],
            )),
            resource => Box::new(CopyFlow::new(
                &self.env,
                execution_id,
                &policy,
                resource.into_iter().collect(),
            )),
        };
        flow.run().await
    }
}
