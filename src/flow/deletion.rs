//! The deletion flow: removes the given resources from the destination

use super::stage::{assemble_destination, assemble_source, create_tasks};
use super::{Flow, FlowEnv, NO_RESOURCES_MESSAGE};
use crate::error::Result;
use crate::filter::filter_resources;
use crate::model::{Policy, Resource};
use async_trait::async_trait;

pub struct DeletionFlow<'a> {
    env: &'a FlowEnv,
    execution_id: i64,
    policy: &'a Policy,
    resources: Vec<Resource>,
}

impl<'a> DeletionFlow<'a> {
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

/// Task operation label for a destination tombstone
pub(crate) fn deletion_operation(dst: &Resource) -> &'static str {
    if dst.is_delete_tag {
        "tag deletion"
    } else {
        "deletion"
    }
}

#[async_trait]
impl Flow for DeletionFlow<'_> {
    async fn run(&mut self) -> Result<()> {
        let src_resources =
            filter_resources(std::mem::take(&mut self.resources), &self.policy.filters)?;
        if src_resources.is_empty() {
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
        create_tasks(
            self.env.executions.tasks(),
            self.execution_id,
            &src_resources,
            &dst_resources,
            deletion_operation,
        )
        .await
    }
}
