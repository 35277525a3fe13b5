//! The replication job: decodes the resource pair and runs the transfer

use super::local::{JobContext, JobRunner};
use super::{PARAM_DST_RESOURCE, PARAM_SRC_RESOURCE, Parameters};
use crate::error::{ReplicationError, Result};
use crate::model::Resource;
use crate::transfer::{TransferRegistry, check_stop};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ReplicationJob {
    transfers: Arc<TransferRegistry>,
}

impl ReplicationJob {
    pub fn new(transfers: Arc<TransferRegistry>) -> Self {
        Self { transfers }
    }
}

fn resource_param(parameters: &Parameters, key: &str) -> Result<Resource> {
    let raw = parameters
        .get(key)
        .and_then(|value| value.as_str())
        .ok_or_else(|| ReplicationError::Validation(format!("missing job parameter {}", key)))?;
    Ok(serde_json::from_str(raw)?)
}

#[async_trait]
impl JobRunner for ReplicationJob {
    async fn run(&self, ctx: &JobContext, parameters: &Parameters) -> Result<()> {
        let src = resource_param(parameters, PARAM_SRC_RESOURCE)?;
        let dst = resource_param(parameters, PARAM_DST_RESOURCE)?;
        let should_stop = ctx.stop_checker();
        check_stop(&should_stop)?;

        let logger = ctx.logger();
        let factory = self.transfers.factory(src.resource_type)?;
        let transfer = factory.create(logger.clone(), should_stop)?;
        if dst.deleted {
            logger.info(&format!("deleting {}", dst.display_name()));
        } else {
            logger.info(&format!(
                "replicating {} to {}",
                src.display_name(),
                dst.display_name()
            ));
        }
        transfer.transfer(&src, &dst).await?;
        logger.info("the replication job completed");
        Ok(())
    }
}
