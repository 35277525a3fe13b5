//! Handling of job status-change callbacks

use super::dao::Store;
use super::model::{Status, Task};
use crate::common::KeyedRegistry;
use crate::error::{ReplicationError, Result};
use crate::job::StatusChange;
use async_trait::async_trait;
use std::sync::Arc;

/// Consumes check-in data reported by tasks of one vendor type
#[async_trait]
pub trait CheckInProcessor: Send + Sync {
    async fn process(&self, task: &Task, data: &str) -> Result<()>;
}

/// Runs after a task status was updated
#[async_trait]
pub trait TaskStatusChangeHook: Send + Sync {
    async fn on_task_status_change(&self, task_id: i64, status: Status) -> Result<()>;
}

/// Runs after an execution status changed through aggregation
#[async_trait]
pub trait ExecutionStatusChangeHook: Send + Sync {
    async fn on_execution_status_change(&self, execution_id: i64, status: Status) -> Result<()>;
}

/// Per-vendor-type callbacks, populated once at start-up
pub struct VendorCallbacks {
    check_in_processors: KeyedRegistry<String, Arc<dyn CheckInProcessor>>,
    task_hooks: KeyedRegistry<String, Arc<dyn TaskStatusChangeHook>>,
    execution_hooks: KeyedRegistry<String, Arc<dyn ExecutionStatusChangeHook>>,
}

impl Default for VendorCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl VendorCallbacks {
    pub fn new() -> Self {
        Self {
            check_in_processors: KeyedRegistry::new("check in processor"),
            task_hooks: KeyedRegistry::new("task status change post function"),
            execution_hooks: KeyedRegistry::new("execution status change post function"),
        }
    }

    pub fn register_check_in_processor(
        &mut self,
        vendor_type: &str,
        processor: Arc<dyn CheckInProcessor>,
    ) -> Result<()> {
        self.check_in_processors.register(vendor_type.to_string(), processor)
    }

    pub fn register_task_status_change_hook(
        &mut self,
        vendor_type: &str,
        hook: Arc<dyn TaskStatusChangeHook>,
    ) -> Result<()> {
        self.task_hooks.register(vendor_type.to_string(), hook)
    }

    pub fn register_execution_status_change_hook(
        &mut self,
        vendor_type: &str,
        hook: Arc<dyn ExecutionStatusChangeHook>,
    ) -> Result<()> {
        self.execution_hooks.register(vendor_type.to_string(), hook)
    }
}

/// Applies status changes reported by the job system
pub struct HookHandler {
    store: Arc<dyn Store>,
    callbacks: Arc<VendorCallbacks>,
}

impl HookHandler {
    pub fn new(store: Arc<dyn Store>, callbacks: Arc<VendorCallbacks>) -> Self {
        Self { store, callbacks }
    }

    /// Handles one status change of task `task_id`.
    ///
    /// Check-in data goes to the vendor's check-in processor and leaves the
    /// task status alone. Otherwise the status is applied if its revision is
    /// newer, the vendor's task hook runs, and the execution status is
    /// recomputed from all of its tasks.
    pub async fn handle(&self, task_id: i64, change: StatusChange) -> Result<()> {
        let task = self.store.get_task(task_id).await?;
        let execution = self.store.get_execution(task.execution_id).await?;
        let vendor_type = execution.vendor_type;

        if let Some(data) = change.check_in.as_deref().filter(|data| !data.is_empty()) {
            let processor = self
                .callbacks
                .check_in_processors
                .get(&vendor_type)
                .map_err(|_| {
                    ReplicationError::NotFound(format!(
                        "the check in processor for task {} not found",
                        task_id
                    ))
                })?;
            return processor.process(&task.into_task(), data).await;
        }

        let applied = self
            .store
            .update_task_status(
                task_id,
                change.status,
                change.revision,
                change.message.as_deref(),
            )
            .await?;
        if !applied {
            tracing::debug!(
                task_id,
                status = %change.status,
                revision = change.revision,
                "ignored stale status change"
            );
            return Ok(());
        }

        if let Ok(hook) = self.callbacks.task_hooks.get(&vendor_type) {
            if let Err(e) = hook.on_task_status_change(task_id, change.status).await {
                tracing::error!(
                    task_id,
                    error = %e,
                    "failed to run the task status change post function"
                );
            }
        }

        let (changed, status) = self
            .store
            .refresh_execution_status(task.execution_id)
            .await?;
        if changed {
            tracing::debug!(
                execution_id = task.execution_id,
                status = %status,
                "execution status changed"
            );
            if let Ok(hook) = self.callbacks.execution_hooks.get(&vendor_type) {
                if let Err(e) = hook
                    .on_execution_status_change(task.execution_id, status)
                    .await
                {
                    tracing::error!(
                        execution_id = task.execution_id,
                        error = %e,
                        "failed to run the execution status change post function"
                    );
                }
            }
        }
        Ok(())
    }
}
