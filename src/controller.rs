//! Replication controller, the entry point for starting and inspecting replications

use crate::error::{ReplicationError, Result};
use crate::flow::FlowController;
use crate::model::{Policy, Resource};
use crate::task::query::Keyword;
use crate::task::{
    Execution, ExecutionManager, Metrics, Query, Status, Task, TaskManager, VENDOR_TYPE_REPLICATION,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default time the error path waits for created tasks to stop
pub const DEFAULT_STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// A replication execution as listed to users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationExecution {
    pub id: i64,
    pub policy_id: i64,
    pub status: Status,
    pub status_message: String,
    pub metrics: Option<Metrics>,
    pub trigger: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<Execution> for ReplicationExecution {
    fn from(execution: Execution) -> Self {
        Self {
            id: execution.id,
            policy_id: execution.vendor_id,
            status: execution.status,
            status_message: execution.status_message,
            metrics: execution.metrics,
            trigger: execution.trigger,
            start_time: execution.start_time,
            end_time: execution.end_time,
        }
    }
}

/// A replication task as listed to users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTask {
    pub id: i64,
    pub execution_id: i64,
    pub job_id: Option<String>,
    pub status: Status,
    pub status_message: String,
    pub retry_count: i32,
    pub operation: String,
    pub resource_type: String,
    pub source_resource: String,
    pub destination_resource: String,
    pub start_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<Task> for ReplicationTask {
    fn from(task: Task) -> Self {
        let attr = |key: &str| {
            task.extra_attrs
                .get(key)
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            operation: attr("operation"),
            resource_type: attr("resource_type"),
            source_resource: attr("source_resource"),
            destination_resource: attr("destination_resource"),
            id: task.id,
            execution_id: task.execution_id,
            job_id: task.job_id,
            status: task.status,
            status_message: task.status_message,
            retry_count: task.retry_count,
            start_time: task.start_time,
            update_time: task.update_time,
            end_time: task.end_time,
        }
    }
}

#[derive(Clone)]
pub struct ReplicationController {
    executions: ExecutionManager,
    tasks: Arc<TaskManager>,
    flows: FlowController,
    stop_wait_timeout: Duration,
}

impl ReplicationController {
    pub fn new(executions: ExecutionManager, flows: FlowController) -> Self {
        Self {
            tasks: Arc::clone(executions.tasks()),
            executions,
            flows,
            stop_wait_timeout: DEFAULT_STOP_WAIT_TIMEOUT,
        }
    }

    pub fn with_stop_wait_timeout(mut self, timeout: Duration) -> Self {
        self.stop_wait_timeout = timeout;
        self
    }

    /// Starts a replication of `policy` and returns the execution id at once.
    ///
    /// The flow runs in the background. If it fails, the tasks it already
    /// created are stopped and the execution is marked failed with the error.
    pub async fn start(
        &self,
        policy: &Policy,
        resource: Option<Resource>,
        trigger: &str,
    ) -> Result<i64> {
        if !policy.enabled {
            return Err(ReplicationError::Precondition(format!(
                "the policy {} is disabled",
                policy.id
            )));
        }
        let id = self
            .executions
            .create(VENDOR_TYPE_REPLICATION, policy.id, trigger, Default::default())
            .await?;
        tracing::info!(execution_id = id, policy_id = policy.id, trigger, "replication started");

        let this = self.clone();
        let policy = policy.clone();
        tokio::spawn(async move {
            let err = match this.flows.start(id, &policy, resource).await {
                Ok(()) => return,
                Err(err) => err,
            };
            tracing::error!(
                execution_id = id,
                policy_id = policy.id,
                error = %err,
                "replication flow failed"
            );
            if let Err(e) = this.executions.stop_and_wait(id, this.stop_wait_timeout).await {
                tracing::error!(execution_id = id, error = %e, "failed to stop the execution");
            }
            if let Err(e) = this.executions.mark_error(id, &err.to_string()).await {
                tracing::error!(
                    execution_id = id,
                    error = %e,
                    "failed to mark error for the execution"
                );
            }
        });
        Ok(id)
    }

    pub async fn stop(&self, execution_id: i64) -> Result<()> {
        self.executions.stop(execution_id).await
    }

    pub async fn execution_count(&self, query: &Query) -> Result<i64> {
        self.executions.count(&replication_query(query)).await
    }

    /// Lists replication executions; `PolicyID`/`policy_id` filter by policy
    pub async fn list_executions(&self, query: &Query) -> Result<Vec<ReplicationExecution>> {
        Ok(self
            .executions
            .list(&replication_query(query))
            .await?
            .into_iter()
            .map(ReplicationExecution::from)
            .collect())
    }

    pub async fn get_execution(&self, execution_id: i64) -> Result<ReplicationExecution> {
        Ok(self.replication_execution(execution_id).await?.into())
    }

    /// Counts the tasks of the replication execution named by the
    /// `ExecutionID` keyword
    pub async fn task_count(&self, query: &Query) -> Result<i64> {
        self.check_task_query(query).await?;
        self.tasks.count(query).await
    }

    /// Lists the tasks of the replication execution named by the
    /// `ExecutionID` keyword
    pub async fn list_tasks(&self, query: &Query) -> Result<Vec<ReplicationTask>> {
        self.check_task_query(query).await?;
        Ok(self
            .tasks
            .list(query)
            .await?
            .into_iter()
            .map(ReplicationTask::from)
            .collect())
    }

    pub async fn get_task(&self, task_id: i64) -> Result<ReplicationTask> {
        Ok(self.replication_task(task_id).await?.into())
    }

    pub async fn get_task_log(&self, task_id: i64) -> Result<Vec<u8>> {
        self.replication_task(task_id).await?;
        self.tasks.get_log(task_id).await
    }

    async fn replication_execution(&self, execution_id: i64) -> Result<Execution> {
        let execution = self.executions.get(execution_id).await?;
        if execution.vendor_type != VENDOR_TYPE_REPLICATION {
            return Err(ReplicationError::NotFound(format!(
                "replication execution {} not found",
                execution_id
            )));
        }
        Ok(execution)
    }

    async fn replication_task(&self, task_id: i64) -> Result<Task> {
        let task = self.tasks.get(task_id).await?;
        match self.replication_execution(task.execution_id).await {
            Ok(_) => Ok(task),
            Err(e) if e.is_not_found() => Err(ReplicationError::NotFound(format!(
                "replication task {} not found",
                task_id
            ))),
            Err(e) => Err(e),
        }
    }

    async fn check_task_query(&self, query: &Query) -> Result<()> {
        let execution_id = query
            .keywords
            .iter()
            .find(|(key, _)| matches!(Keyword::parse(key), Ok(Keyword::ExecutionId)))
            .and_then(|(_, value)| {
                value
                    .as_i64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            })
            .ok_or_else(|| {
                ReplicationError::Validation(
                    "replication tasks must be queried by ExecutionID".to_string(),
                )
            })?;
        self.replication_execution(execution_id).await?;
        Ok(())
    }
}

/// Maps policy keywords onto the execution columns and pins the vendor type
fn replication_query(query: &Query) -> Query {
    let mut query = query.clone();
    for key in ["PolicyID", "policy_id"] {
        if let Some(value) = query.keywords.remove(key) {
            query.keywords.insert("VendorID".to_string(), value);
        }
    }
    query
        .keywords
        .insert("VendorType".to_string(), VENDOR_TYPE_REPLICATION.into());
    query
}
