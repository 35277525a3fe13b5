//! Persistence seam for executions and tasks
//!
//! [`Store`] is the only place execution and task rows are read or written.
//! [`MemoryStore`] keeps every table behind one lock, so the status
//! aggregation in [`Store::refresh_execution_status`] always sees a consistent
//! set of task statuses.

use super::model::{Execution, ExtraAttrs, Metrics, Status, Task};
use super::query::{Keyword, Query, matches_int, matches_str};
use crate::error::{ReplicationError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Execution row; `extra_attrs` is a JSON object string
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub id: i64,
    pub vendor_type: String,
    pub vendor_id: i64,
    pub status: Status,
    pub status_message: String,
    pub trigger: String,
    pub extra_attrs: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Task row; `extra_attrs` is a JSON object string
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: i64,
    pub execution_id: i64,
    pub job_id: Option<String>,
    pub status: Status,
    pub status_code: i32,
    pub status_revision: i64,
    pub status_message: String,
    pub retry_count: i32,
    pub extra_attrs: String,
    pub start_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

fn parse_extra_attrs(owner: &str, raw: &str) -> ExtraAttrs {
    if raw.is_empty() {
        return ExtraAttrs::new();
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::error!("failed to unmarshal the extra attributes of {}: {}", owner, e);
        ExtraAttrs::new()
    })
}

impl ExecutionRecord {
    pub fn into_execution(self, metrics: Option<Metrics>) -> Execution {
        let extra_attrs = parse_extra_attrs(&format!("execution {}", self.id), &self.extra_attrs);
        Execution {
            id: self.id,
            vendor_type: self.vendor_type,
            vendor_id: self.vendor_id,
            status: self.status,
            status_message: self.status_message,
            metrics,
            trigger: self.trigger,
            extra_attrs,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

impl TaskRecord {
    pub fn into_task(self) -> Task {
        let extra_attrs = parse_extra_attrs(&format!("task {}", self.id), &self.extra_attrs);
        Task {
            id: self.id,
            execution_id: self.execution_id,
            job_id: self.job_id,
            status: self.status,
            status_code: self.status_code,
            status_revision: self.status_revision,
            status_message: self.status_message,
            retry_count: self.retry_count,
            extra_attrs,
            start_time: self.start_time,
            update_time: self.update_time,
            end_time: self.end_time,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts the execution and returns its id; `record.id` is ignored
    async fn create_execution(&self, record: ExecutionRecord) -> Result<i64>;

    async fn get_execution(&self, id: i64) -> Result<ExecutionRecord>;

    /// Newest first
    async fn list_executions(&self, query: &Query) -> Result<Vec<ExecutionRecord>>;

    async fn count_executions(&self, query: &Query) -> Result<i64>;

    /// Sets the status explicitly. `message` replaces the status message when
    /// given; the end time is set for final statuses and cleared otherwise.
    async fn update_execution_status(
        &self,
        id: i64,
        status: Status,
        message: Option<&str>,
    ) -> Result<()>;

    /// Deletes the execution and its tasks, refusing with
    /// [`ReplicationError::Precondition`] if any task isn't final. Nothing is
    /// deleted in that case.
    async fn delete_execution(&self, id: i64) -> Result<()>;

    /// Task count per status for one execution
    async fn status_counts(&self, execution_id: i64) -> Result<BTreeMap<Status, i64>>;

    /// Recomputes the execution status from its tasks. Returns whether the
    /// status changed and the current status. Executions without tasks keep
    /// their status.
    async fn refresh_execution_status(&self, id: i64) -> Result<(bool, Status)>;

    /// Inserts the task and returns its id; the execution must exist
    async fn create_task(&self, record: TaskRecord) -> Result<i64>;

    async fn get_task(&self, id: i64) -> Result<TaskRecord>;

    /// Newest first
    async fn list_tasks(&self, query: &Query) -> Result<Vec<TaskRecord>>;

    async fn count_tasks(&self, query: &Query) -> Result<i64>;

    async fn update_task_job_id(&self, id: i64, job_id: &str) -> Result<()>;

    /// Sets the status without a revision check, for transitions the engine
    /// decides itself (submission failure, stopping a task that never ran)
    async fn set_task_status(&self, id: i64, status: Status, message: &str) -> Result<()>;

    /// Applies a status reported by the job system. `message` replaces the
    /// status message. Returns `false` and changes nothing when `revision`
    /// isn't newer than the stored one.
    async fn update_task_status(
        &self,
        id: i64,
        status: Status,
        revision: i64,
        message: Option<&str>,
    ) -> Result<bool>;
}

#[derive(Debug, Default)]
struct Tables {
    executions: BTreeMap<i64, ExecutionRecord>,
    tasks: BTreeMap<i64, TaskRecord>,
    next_execution_id: i64,
    next_task_id: i64,
}

impl Tables {
    fn execution(&self, id: i64) -> Result<&ExecutionRecord> {
        self.executions
            .get(&id)
            .ok_or_else(|| ReplicationError::NotFound(format!("execution {} not found", id)))
    }

    fn execution_mut(&mut self, id: i64) -> Result<&mut ExecutionRecord> {
        self.executions
            .get_mut(&id)
            .ok_or_else(|| ReplicationError::NotFound(format!("execution {} not found", id)))
    }

    fn task(&self, id: i64) -> Result<&TaskRecord> {
        self.tasks
            .get(&id)
            .ok_or_else(|| ReplicationError::NotFound(format!("task {} not found", id)))
    }

    fn task_mut(&mut self, id: i64) -> Result<&mut TaskRecord> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| ReplicationError::NotFound(format!("task {} not found", id)))
    }

    fn tasks_of(&self, execution_id: i64) -> impl Iterator<Item = &TaskRecord> {
        self.tasks
            .values()
            .filter(move |task| task.execution_id == execution_id)
    }

    fn status_counts(&self, execution_id: i64) -> BTreeMap<Status, i64> {
        let mut counts = BTreeMap::new();
        for task in self.tasks_of(execution_id) {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    fn filtered_executions(&self, query: &Query) -> Result<Vec<ExecutionRecord>> {
        let conditions = query.conditions()?;
        for (keyword, _) in &conditions {
            if *keyword == Keyword::ExecutionId {
                return Err(ReplicationError::Validation(
                    "executions can't be queried by ExecutionID, use ID".to_string(),
                ));
            }
        }
        Ok(self
            .executions
            .values()
            .rev()
            .filter(|execution| {
                conditions.iter().all(|(keyword, value)| match keyword {
                    Keyword::Id | Keyword::ExecutionId => matches_int(execution.id, value),
                    Keyword::VendorType => matches_str(&execution.vendor_type, value),
                    Keyword::VendorId => matches_int(execution.vendor_id, value),
                    Keyword::Status => matches_str(execution.status.as_str(), value),
                    Keyword::Trigger => matches_str(&execution.trigger, value),
                })
            })
            .cloned()
            .collect())
    }

    fn filtered_tasks(&self, query: &Query) -> Result<Vec<TaskRecord>> {
        let conditions = query.conditions()?;
        for (keyword, _) in &conditions {
            if matches!(keyword, Keyword::VendorType | Keyword::VendorId | Keyword::Trigger) {
                return Err(ReplicationError::Validation(format!(
                    "tasks can't be queried by {:?}",
                    keyword
                )));
            }
        }
        Ok(self
            .tasks
            .values()
            .rev()
            .filter(|task| {
                conditions.iter().all(|(keyword, value)| match keyword {
                    Keyword::Id => matches_int(task.id, value),
                    Keyword::ExecutionId => matches_int(task.execution_id, value),
                    Keyword::Status => matches_str(task.status.as_str(), value),
                    Keyword::VendorType | Keyword::VendorId | Keyword::Trigger => false,
                })
            })
            .cloned()
            .collect())
    }
}

/// Explains a failed or stopped execution from its task counts
fn derived_status_message(status: Status, counts: &BTreeMap<Status, i64>) -> String {
    let total: i64 = counts.values().sum();
    let count = |status: Status| counts.get(&status).copied().unwrap_or(0);
    match status {
        Status::Failed => format!(
            "{} of {} task(s) failed, see the task status messages",
            count(Status::Failed),
            total
        ),
        Status::Stopped => format!("{} of {} task(s) stopped", count(Status::Stopped), total),
        _ => String::new(),
    }
}

/// In-process [`Store`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(ReplicationError::poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(ReplicationError::poisoned)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_execution(&self, mut record: ExecutionRecord) -> Result<i64> {
        let mut tables = self.write()?;
        tables.next_execution_id += 1;
        record.id = tables.next_execution_id;
        let id = record.id;
        tables.executions.insert(id, record);
        Ok(id)
    }

    async fn get_execution(&self, id: i64) -> Result<ExecutionRecord> {
        self.read()?.execution(id).cloned()
    }

    async fn list_executions(&self, query: &Query) -> Result<Vec<ExecutionRecord>> {
        let executions = self.read()?.filtered_executions(query)?;
        Ok(query.paginate(executions))
    }

    async fn count_executions(&self, query: &Query) -> Result<i64> {
        Ok(self.read()?.filtered_executions(query)?.len() as i64)
    }

    async fn update_execution_status(
        &self,
        id: i64,
        status: Status,
        message: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.write()?;
        let execution = tables.execution_mut(id)?;
        execution.status = status;
        if let Some(message) = message {
            execution.status_message = message.to_string();
        }
        execution.end_time = status.is_final().then(Utc::now);
        Ok(())
    }

    async fn delete_execution(&self, id: i64) -> Result<()> {
        let mut tables = self.write()?;
        tables.execution(id)?;
        if tables.tasks_of(id).any(|task| !task.status.is_final()) {
            return Err(ReplicationError::Precondition(format!(
                "the execution {} has tasks that aren't in final status, stop the tasks first",
                id
            )));
        }
        tables.tasks.retain(|_, task| task.execution_id != id);
        tables.executions.remove(&id);
        Ok(())
    }

    async fn status_counts(&self, execution_id: i64) -> Result<BTreeMap<Status, i64>> {
        let tables = self.read()?;
        tables.execution(execution_id)?;
        Ok(tables.status_counts(execution_id))
    }

    async fn refresh_execution_status(&self, id: i64) -> Result<(bool, Status)> {
        let mut tables = self.write()?;
        let counts = tables.status_counts(id);
        let end_time = tables
            .tasks_of(id)
            .filter_map(|task| task.end_time)
            .max();
        let execution = tables.execution_mut(id)?;
        let Some(derived) = super::model::aggregate_status(&counts) else {
            return Ok((false, execution.status));
        };
        if derived == execution.status {
            return Ok((false, derived));
        }
        execution.status = derived;
        execution.status_message = derived_status_message(derived, &counts);
        execution.end_time = if derived.is_final() {
            end_time.or_else(|| Some(Utc::now()))
        } else {
            None
        };
        Ok((true, derived))
    }

    async fn create_task(&self, mut record: TaskRecord) -> Result<i64> {
        let mut tables = self.write()?;
        if !tables.executions.contains_key(&record.execution_id) {
            return Err(ReplicationError::NotFound(format!(
                "the task tries to reference a non existing execution {}",
                record.execution_id
            )));
        }
        tables.next_task_id += 1;
        record.id = tables.next_task_id;
        let id = record.id;
        tables.tasks.insert(id, record);
        Ok(id)
    }

    async fn get_task(&self, id: i64) -> Result<TaskRecord> {
        self.read()?.task(id).cloned()
    }

    async fn list_tasks(&self, query: &Query) -> Result<Vec<TaskRecord>> {
        let tasks = self.read()?.filtered_tasks(query)?;
        Ok(query.paginate(tasks))
    }

    async fn count_tasks(&self, query: &Query) -> Result<i64> {
        Ok(self.read()?.filtered_tasks(query)?.len() as i64)
    }

    async fn update_task_job_id(&self, id: i64, job_id: &str) -> Result<()> {
        let mut tables = self.write()?;
        let task = tables.task_mut(id)?;
        task.job_id = Some(job_id.to_string());
        task.update_time = Utc::now();
        Ok(())
    }

    async fn set_task_status(&self, id: i64, status: Status, message: &str) -> Result<()> {
        let mut tables = self.write()?;
        let task = tables.task_mut(id)?;
        let now = Utc::now();
        task.status = status;
        task.status_code = status.code();
        task.status_message = message.to_string();
        task.update_time = now;
        task.end_time = status.is_final().then_some(now);
        Ok(())
    }

    async fn update_task_status(
        &self,
        id: i64,
        status: Status,
        revision: i64,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut tables = self.write()?;
        let task = tables.task_mut(id)?;
        if revision <= task.status_revision {
            return Ok(false);
        }
        let now = Utc::now();
        // the job system re-ran a finished job
        if task.status.is_final() && !status.is_final() {
            task.retry_count += 1;
        }
        task.status = status;
        task.status_code = status.code();
        task.status_revision = revision;
        task.status_message = message.unwrap_or_default().to_string();
        task.update_time = now;
        task.end_time = status.is_final().then_some(now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execution(vendor_id: i64) -> ExecutionRecord {
        ExecutionRecord {
            id: 0,
            vendor_type: "REPLICATION".to_string(),
            vendor_id,
            status: Status::Running,
            status_message: String::new(),
            trigger: "MANUAL".to_string(),
            extra_attrs: "{}".to_string(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    fn task(execution_id: i64) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            id: 0,
            execution_id,
            job_id: None,
            status: Status::Pending,
            status_code: 0,
            status_revision: 0,
            status_message: String::new(),
            retry_count: 0,
            extra_attrs: "{}".to_string(),
            start_time: now,
            update_time: now,
            end_time: None,
        }
    }

    #[tokio::test]
    async fn test_task_requires_execution() {
        let store = MemoryStore::new();
        let err = store.create_task(task(42)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_revision_is_ignored() {
        let store = MemoryStore::new();
        let execution_id = store.create_execution(execution(1)).await.unwrap();
        let task_id = store.create_task(task(execution_id)).await.unwrap();

        assert!(store.update_task_status(task_id, Status::Succeeded, 3, None).await.unwrap());
        assert!(!store.update_task_status(task_id, Status::Running, 2, None).await.unwrap());
        assert!(!store.update_task_status(task_id, Status::Running, 3, None).await.unwrap());

        let stored = store.get_task(task_id).await.unwrap();
        assert_eq!(stored.status, Status::Succeeded);
        assert_eq!(stored.status_revision, 3);
        assert!(stored.end_time.is_some());
    }

    #[tokio::test]
    async fn test_rerun_counts_as_retry() {
        let store = MemoryStore::new();
        let execution_id = store.create_execution(execution(1)).await.unwrap();
        let task_id = store.create_task(task(execution_id)).await.unwrap();

        store
            .update_task_status(task_id, Status::Failed, 1, Some("connection refused"))
            .await
            .unwrap();
        assert_eq!(store.get_task(task_id).await.unwrap().status_message, "connection refused");

        store.update_task_status(task_id, Status::Running, 2, None).await.unwrap();
        let stored = store.get_task(task_id).await.unwrap();
        assert_eq!(stored.status_message, "");
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.status, Status::Running);
        assert!(stored.end_time.is_none());
    }

    #[tokio::test]
    async fn test_refresh_derives_status_and_end_time() {
        let store = MemoryStore::new();
        let execution_id = store.create_execution(execution(1)).await.unwrap();
        let first = store.create_task(task(execution_id)).await.unwrap();
        let second = store.create_task(task(execution_id)).await.unwrap();

        store.update_task_status(first, Status::Running, 1, None).await.unwrap();
        assert_eq!(
            store.refresh_execution_status(execution_id).await.unwrap(),
            (false, Status::Running)
        );

        store.update_task_status(first, Status::Succeeded, 2, None).await.unwrap();
        assert_eq!(
            store.refresh_execution_status(execution_id).await.unwrap(),
            (true, Status::Pending)
        );

        store.update_task_status(second, Status::Succeeded, 1, None).await.unwrap();
        assert_eq!(
            store.refresh_execution_status(execution_id).await.unwrap(),
            (true, Status::Succeeded)
        );
        let stored = store.get_execution(execution_id).await.unwrap();
        let latest = store
            .get_task(first)
            .await
            .unwrap()
            .end_time
            .max(store.get_task(second).await.unwrap().end_time);
        assert_eq!(stored.end_time, latest);
    }

    #[tokio::test]
    async fn test_refresh_without_tasks_keeps_status() {
        let store = MemoryStore::new();
        let execution_id = store.create_execution(execution(1)).await.unwrap();
        store
            .update_execution_status(execution_id, Status::Succeeded, Some("nothing to do"))
            .await
            .unwrap();
        assert_eq!(
            store.refresh_execution_status(execution_id).await.unwrap(),
            (false, Status::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_failed_execution_explains_itself() {
        let store = MemoryStore::new();
        let execution_id = store.create_execution(execution(1)).await.unwrap();
        let ok = store.create_task(task(execution_id)).await.unwrap();
        let broken = store.create_task(task(execution_id)).await.unwrap();
        store.update_task_status(ok, Status::Succeeded, 1, None).await.unwrap();
        store
            .update_task_status(broken, Status::Failed, 1, Some("manifest unknown"))
            .await
            .unwrap();
        store.refresh_execution_status(execution_id).await.unwrap();

        let stored = store.get_execution(execution_id).await.unwrap();
        assert_eq!(stored.status, Status::Failed);
        assert!(stored.status_message.starts_with("1 of 2 task(s) failed"));
        assert_eq!(store.get_task(broken).await.unwrap().status_message, "manifest unknown");
    }

    #[tokio::test]
    async fn test_delete_refuses_with_running_task() {
        let store = MemoryStore::new();
        let execution_id = store.create_execution(execution(1)).await.unwrap();
        let done = store.create_task(task(execution_id)).await.unwrap();
        let running = store.create_task(task(execution_id)).await.unwrap();
        store.update_task_status(done, Status::Succeeded, 1, None).await.unwrap();
        store.update_task_status(running, Status::Running, 1, None).await.unwrap();

        let err = store.delete_execution(execution_id).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Precondition(_)));
        assert!(store.get_task(done).await.is_ok());
        assert!(store.get_task(running).await.is_ok());
        assert!(store.get_execution(execution_id).await.is_ok());

        store.update_task_status(running, Status::Stopped, 2, None).await.unwrap();
        store.delete_execution(execution_id).await.unwrap();
        assert!(store.get_execution(execution_id).await.unwrap_err().is_not_found());
        assert!(store.get_task(done).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_newest_first() {
        let store = MemoryStore::new();
        let a = store.create_execution(execution(1)).await.unwrap();
        store.create_execution(execution(2)).await.unwrap();
        let c = store.create_execution(execution(1)).await.unwrap();

        let query = Query::new().with_keyword("VendorID", 1);
        let ids: Vec<i64> = store
            .list_executions(&query)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![c, a]);
        assert_eq!(store.count_executions(&query).await.unwrap(), 2);

        let paged = store
            .list_executions(&Query::new().with_page(1, 1))
            .await
            .unwrap();
        assert_eq!(paged[0].id, c);
        assert_eq!(store.count_executions(&Query::new()).await.unwrap(), 3);

        let bad = Query::new().with_keyword("Color", json!("red"));
        assert!(store.list_executions(&bad).await.is_err());
    }
}
