//! Execution manager: one execution per vendor action run

use super::dao::{ExecutionRecord, Store};
use super::manager::TaskManager;
use super::model::{Execution, ExtraAttrs, Metrics, Status};
use super::query::Query;
use crate::error::{ReplicationError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

const DEFAULT_POLL_INITIAL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_POLL_MAX_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct ExecutionManager {
    store: Arc<dyn Store>,
    tasks: Arc<TaskManager>,
    poll_initial_interval: Duration,
    poll_max_interval: Duration,
}

impl ExecutionManager {
    pub fn new(store: Arc<dyn Store>, tasks: Arc<TaskManager>) -> Self {
        Self {
            store,
            tasks,
            poll_initial_interval: DEFAULT_POLL_INITIAL_INTERVAL,
            poll_max_interval: DEFAULT_POLL_MAX_INTERVAL,
        }
    }

    /// Backoff used by [`ExecutionManager::stop_and_wait`] while polling
    pub fn with_poll_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.poll_initial_interval = initial;
        self.poll_max_interval = max.max(initial);
        self
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    /// Creates a running execution and returns its id
    pub async fn create(
        &self,
        vendor_type: &str,
        vendor_id: i64,
        trigger: &str,
        extra_attrs: ExtraAttrs,
    ) -> Result<i64> {
        let id = self
            .store
            .create_execution(ExecutionRecord {
                id: 0,
                vendor_type: vendor_type.to_string(),
                vendor_id,
                status: Status::Running,
                status_message: String::new(),
                trigger: trigger.to_string(),
                extra_attrs: serde_json::to_string(&extra_attrs)?,
                start_time: Utc::now(),
                end_time: None,
            })
            .await?;
        tracing::debug!(execution_id = id, vendor_type, vendor_id, trigger, "execution created");
        Ok(id)
    }

    /// Marks the execution succeeded. Only for executions without tasks.
    pub async fn mark_done(&self, id: i64, message: &str) -> Result<()> {
        self.store
            .update_execution_status(id, Status::Succeeded, Some(message))
            .await
    }

    /// Marks the execution failed, e.g. when its tasks couldn't be created
    pub async fn mark_error(&self, id: i64, message: &str) -> Result<()> {
        self.store
            .update_execution_status(id, Status::Failed, Some(message))
            .await
    }

    /// Stops every task of the execution.
    ///
    /// An execution without tasks that isn't final yet becomes `STOPPED`
    /// directly. Tasks that fail to stop are logged and skipped.
    pub async fn stop(&self, id: i64) -> Result<()> {
        let execution = self.store.get_execution(id).await?;
        let tasks = self
            .store
            .list_tasks(&Query::new().with_keyword("ExecutionID", id))
            .await?;
        if tasks.is_empty() {
            if !execution.status.is_final() {
                self.store
                    .update_execution_status(id, Status::Stopped, None)
                    .await?;
            }
            return Ok(());
        }
        for task in tasks {
            if let Err(e) = self.tasks.stop(task.id).await {
                tracing::error!(
                    execution_id = id,
                    task_id = task.id,
                    error = %e,
                    "failed to stop task"
                );
            }
        }
        Ok(())
    }

    /// Stops the execution and waits until it reaches a final status.
    ///
    /// Gives up with [`ReplicationError::Timeout`] after `timeout`; the stop
    /// requests already sent stay in effect.
    pub async fn stop_and_wait(&self, id: i64, timeout: Duration) -> Result<()> {
        let overtime = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let flag = Arc::clone(&overtime);
        tokio::spawn(async move {
            let result = this.stop_and_poll(id, &flag).await;
            // the receiver is gone once the caller timed out
            let _ = tx.send(result);
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReplicationError::Internal(format!(
                "the stop of execution {} ended without a result",
                id
            ))),
            Err(_) => {
                overtime.store(true, Ordering::SeqCst);
                Err(ReplicationError::Timeout(format!(
                    "stopping the execution {} timeout",
                    id
                )))
            }
        }
    }

    async fn stop_and_poll(&self, id: i64, overtime: &AtomicBool) -> Result<()> {
        self.stop(id).await?;
        let mut interval = self.poll_initial_interval;
        loop {
            let execution = self.store.get_execution(id).await?;
            if execution.status.is_final() {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
            if interval < self.poll_max_interval {
                interval = (interval * 2).min(self.poll_max_interval);
            }
            if overtime.load(Ordering::SeqCst) {
                return Err(ReplicationError::Timeout(format!(
                    "stopping the execution {} timeout",
                    id
                )));
            }
        }
    }

    /// Deletes the execution and its tasks; every task must be final
    pub async fn delete(&self, id: i64) -> Result<()> {
        self.store.delete_execution(id).await
    }

    pub async fn get(&self, id: i64) -> Result<Execution> {
        let record = self.store.get_execution(id).await?;
        Ok(self.populate(record).await)
    }

    pub async fn list(&self, query: &Query) -> Result<Vec<Execution>> {
        let records = self.store.list_executions(query).await?;
        let mut executions = Vec::with_capacity(records.len());
        for record in records {
            executions.push(self.populate(record).await);
        }
        Ok(executions)
    }

    pub async fn count(&self, query: &Query) -> Result<i64> {
        self.store.count_executions(&query.without_page()).await
    }

    async fn populate(&self, record: ExecutionRecord) -> Execution {
        let metrics = match self.store.status_counts(record.id).await {
            Ok(counts) => Some(Metrics::from_counts(&counts)),
            Err(e) => {
                tracing::error!(
                    execution_id = record.id,
                    error = %e,
                    "failed to get metrics of the execution"
                );
                None
            }
        };
        record.into_execution(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobMetadata, JobSubmitter};
    use crate::task::dao::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    /// Accepts stop requests but never acts on them
    struct IgnoringSubmitter;

    #[async_trait]
    impl JobSubmitter for IgnoringSubmitter {
        async fn submit(&self, task_id: i64, _job: &Job) -> Result<String> {
            Ok(format!("job-{}", task_id))
        }

        async fn stop(&self, _job_id: &str) -> Result<()> {
            Ok(())
        }

        async fn get_log(&self, _job_id: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn managers() -> (Arc<MemoryStore>, ExecutionManager) {
        let store = Arc::new(MemoryStore::new());
        let tasks = Arc::new(TaskManager::new(store.clone(), Arc::new(IgnoringSubmitter)));
        let executions = ExecutionManager::new(store.clone(), tasks)
            .with_poll_intervals(Duration::from_millis(5), Duration::from_millis(20));
        (store, executions)
    }

    fn job() -> Job {
        Job {
            name: "REPLICATION".to_string(),
            parameters: Default::default(),
            metadata: JobMetadata::generic(),
        }
    }

    #[tokio::test]
    async fn test_mark_done_and_extra_attrs() {
        let (_, executions) = managers();
        let mut attrs = ExtraAttrs::new();
        attrs.insert("policy".to_string(), json!({"name": "p1", "enabled": true}));
        let id = executions.create("REPLICATION", 7, "MANUAL", attrs.clone()).await.unwrap();
        executions.mark_done(id, "no resources need to be replicated").await.unwrap();

        let execution = executions.get(id).await.unwrap();
        assert_eq!(execution.status, Status::Succeeded);
        assert_eq!(execution.status_message, "no resources need to be replicated");
        assert_eq!(execution.extra_attrs, attrs);
        assert_eq!(execution.metrics.unwrap().task_count, 0);
        assert!(execution.end_time.is_some());
    }

    #[tokio::test]
    async fn test_stop_without_tasks() {
        let (_, executions) = managers();
        let id = executions.create("REPLICATION", 1, "MANUAL", ExtraAttrs::new()).await.unwrap();
        executions.stop(id).await.unwrap();
        assert_eq!(executions.get(id).await.unwrap().status, Status::Stopped);

        let done = executions.create("REPLICATION", 1, "MANUAL", ExtraAttrs::new()).await.unwrap();
        executions.mark_error(done, "boom").await.unwrap();
        executions.stop(done).await.unwrap();
        assert_eq!(executions.get(done).await.unwrap().status, Status::Failed);
    }

    #[tokio::test]
    async fn test_stop_and_wait_times_out() {
        let (_, executions) = managers();
        let id = executions.create("REPLICATION", 1, "MANUAL", ExtraAttrs::new()).await.unwrap();
        executions.tasks().create(id, &job(), ExtraAttrs::new()).await.unwrap();

        let err = executions
            .stop_and_wait(id, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Timeout(_)));
        assert_eq!(err.to_string(), format!("stopping the execution {} timeout", id));
        assert!(!executions.get(id).await.unwrap().status.is_final());
    }

    #[tokio::test]
    async fn test_stop_and_wait_returns_once_final() {
        let (store, executions) = managers();
        let id = executions.create("REPLICATION", 1, "MANUAL", ExtraAttrs::new()).await.unwrap();
        let task_id = executions.tasks().create(id, &job(), ExtraAttrs::new()).await.unwrap();

        let reporter = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reporter.update_task_status(task_id, Status::Stopped, 1, None).await.unwrap();
            reporter.refresh_execution_status(id).await.unwrap();
        });
        executions
            .stop_and_wait(id, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(executions.get(id).await.unwrap().status, Status::Stopped);
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let (_, executions) = managers();
        for vendor_id in [1, 2, 1] {
            executions
                .create("REPLICATION", vendor_id, "MANUAL", ExtraAttrs::new())
                .await
                .unwrap();
        }
        let query = Query::new().with_keyword("vendor_id", 1).with_page(1, 1);
        assert_eq!(executions.list(&query).await.unwrap().len(), 1);
        assert_eq!(executions.count(&query).await.unwrap(), 2);
    }
}
