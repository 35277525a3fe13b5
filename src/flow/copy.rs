//! The copy flow: fetch, filter, assemble and create one copy task per resource

use super::stage::{
    assemble_destination, assemble_source, create_tasks, fetch_resources, initialize,
};
use super::{Flow, FlowEnv, NO_RESOURCES_MESSAGE};
use crate::common::{Timer, pluralize};
use crate::error::Result;
use crate::filter::filter_resources;
use crate::model::{Policy, Resource};
use async_trait::async_trait;

pub struct CopyFlow<'a> {
    env: &'a FlowEnv,
    execution_id: i64,
    policy: &'a Policy,
    resources: Vec<Resource>,
}

impl<'a> CopyFlow<'a> {
    /// `resources` replaces fetching from the source registry when not empty
    pub fn new(
        env: &'a FlowEnv,
        execution_id: i64,
        policy: &'a Policy,
        resources: Vec<Resource>,
    ) -> Self {
        Self {
            env,
            execution_id,
            policy,
            resources,
        }
    }
}

#[async_trait]
impl Flow for CopyFlow<'_> {
    async fn run(&mut self) -> Result<()> {
        let (src_adapter, dst_adapter) = initialize(&self.env.adapters, self.policy)?;

        let timer = Timer::start(format!("fetching resources of policy {}", self.policy.id));
        let src_resources = if self.resources.is_empty() {
            fetch_resources(src_adapter.as_ref(), self.policy).await?
        } else {
            filter_resources(std::mem::take(&mut self.resources), &self.policy.filters)?
        };
        timer.log_elapsed();

        if src_resources.is_empty() {
            tracing::info!(execution_id = self.execution_id, "{}", NO_RESOURCES_MESSAGE);
            if let Err(e) = self
                .env
                .executions
                .mark_done(self.execution_id, NO_RESOURCES_MESSAGE)
                .await
            {
                tracing::error!(
                    execution_id = self.execution_id,
                    error = %e,
                    "failed to mark done for the execution"
                );
            }
            return Ok(());
        }

        let src_resources = assemble_source(src_resources, self.policy);
        let dst_resources = assemble_destination(&src_resources, self.policy);
        dst_adapter.prepare_for_push(&dst_resources).await?;

        tracing::info!(
            execution_id = self.execution_id,
            policy_id = self.policy.id,
            "copying {}",
            pluralize(src_resources.len(), "resource")
        );
        create_tasks(
            self.env.executions.tasks(),
            self.execution_id,
            &src_resources,
            &dst_resources,
            |_| "copy",
        )
        .await
    }
}
