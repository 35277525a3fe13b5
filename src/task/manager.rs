//! Task manager: creates tasks, submits their jobs and stops them

use super::dao::{Store, TaskRecord};
use super::model::{ExtraAttrs, Status, Task};
use super::query::Query;
use crate::error::Result;
use crate::job::{Job, JobSubmitter};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct TaskManager {
    store: Arc<dyn Store>,
    submitter: Arc<dyn JobSubmitter>,
}

impl TaskManager {
    pub fn new(store: Arc<dyn Store>, submitter: Arc<dyn JobSubmitter>) -> Self {
        Self { store, submitter }
    }

    /// Creates a task under `execution_id` and submits its job.
    ///
    /// A failed submission doesn't fail the call: the task is kept as
    /// `FAILED` with the reason in its status message, and its id is returned.
    pub async fn create(
        &self,
        execution_id: i64,
        job: &Job,
        extra_attrs: ExtraAttrs,
    ) -> Result<i64> {
        let now = Utc::now();
        let id = self
            .store
            .create_task(TaskRecord {
                id: 0,
                execution_id,
                job_id: None,
                status: Status::Pending,
                status_code: Status::Pending.code(),
                status_revision: 0,
                status_message: String::new(),
                retry_count: 0,
                extra_attrs: serde_json::to_string(&extra_attrs)?,
                start_time: now,
                update_time: now,
                end_time: None,
            })
            .await?;

        match self.submitter.submit(id, job).await {
            Ok(job_id) => {
                self.store.update_task_job_id(id, &job_id).await?;
                tracing::debug!(execution_id, task_id = id, job_id = %job_id, "task created");
            }
            Err(e) => {
                tracing::error!(execution_id, task_id = id, error = %e, "failed to submit the job");
                self.store
                    .set_task_status(
                        id,
                        Status::Failed,
                        &format!("failed to submit the job: {}", e),
                    )
                    .await?;
                self.store.refresh_execution_status(execution_id).await?;
            }
        }
        Ok(id)
    }

    /// Stops the task's job. Final tasks are left alone; a task whose job
    /// was never submitted is marked stopped directly.
    pub async fn stop(&self, id: i64) -> Result<()> {
        let task = self.store.get_task(id).await?;
        if task.status.is_final() {
            return Ok(());
        }
        match task.job_id.as_deref() {
            Some(job_id) => self.submitter.stop(job_id).await,
            None => {
                self.store.set_task_status(id, Status::Stopped, "").await?;
                self.store.refresh_execution_status(task.execution_id).await?;
                Ok(())
            }
        }
    }

    pub async fn get(&self, id: i64) -> Result<Task> {
        Ok(self.store.get_task(id).await?.into_task())
    }

    pub async fn list(&self, query: &Query) -> Result<Vec<Task>> {
        Ok(self
            .store
            .list_tasks(query)
            .await?
            .into_iter()
            .map(TaskRecord::into_task)
            .collect())
    }

    pub async fn count(&self, query: &Query) -> Result<i64> {
        self.store.count_tasks(&query.without_page()).await
    }

    /// The job log; empty when no job was ever submitted
    pub async fn get_log(&self, id: i64) -> Result<Vec<u8>> {
        let task = self.store.get_task(id).await?;
        match task.job_id.as_deref() {
            Some(job_id) => self.submitter.get_log(job_id).await,
            None => Ok(Vec::new()),
        }
    }
}
