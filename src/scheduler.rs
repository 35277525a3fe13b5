//! Scheduled triggering
//!
//! A periodic scheduler job checks in on every tick. The check-in is routed
//! to [`SchedulerCheckInProcessor`], which looks up the schedule behind the
//! execution and invokes the callback the schedule names.

use crate::common::KeyedRegistry;
use crate::controller::ReplicationController;
use crate::error::{ReplicationError, Result};
use crate::model::PolicyProvider;
use crate::task::dao::Store;
use crate::task::{CheckInProcessor, TRIGGER_SCHEDULE, Task, VENDOR_TYPE_SCHEDULER};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Callback name under which replication registers itself
pub const REPLICATION_CALLBACK: &str = "REPLICATION_CALLBACK";

/// Invoked when a schedule fires, with the parameter stored on the schedule
#[async_trait]
pub trait SchedulerCallback: Send + Sync {
    async fn call(&self, param: &Value) -> Result<()>;
}

/// A registered periodic trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub cron: String,
    pub callback_func_name: String,
    #[serde(default)]
    pub callback_func_param: Value,
}

/// Read access to the persisted schedules
#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    async fn get(&self, id: i64) -> Result<Schedule>;
}

/// Callback name to callback. Registers through `&self`, so callbacks can be
/// added after the registry is shared.
pub struct CallbackRegistry {
    callbacks: RwLock<KeyedRegistry<String, Arc<dyn SchedulerCallback>>>,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(KeyedRegistry::new("callback function")),
        }
    }

    pub fn register(&self, name: &str, callback: Arc<dyn SchedulerCallback>) -> Result<()> {
        if name.is_empty() {
            return Err(ReplicationError::Validation("empty name".to_string()));
        }
        self.callbacks
            .write()
            .map_err(ReplicationError::poisoned)?
            .register(name.to_string(), callback)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SchedulerCallback>> {
        let callbacks = self.callbacks.read().map_err(ReplicationError::poisoned)?;
        callbacks.get(&name.to_string()).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks
            .read()
            .map(|callbacks| callbacks.contains(&name.to_string()))
            .unwrap_or(false)
    }
}

/// Check-in processor for the `SCHEDULER` vendor type
pub struct SchedulerCheckInProcessor {
    store: Arc<dyn Store>,
    schedules: Arc<dyn ScheduleProvider>,
    callbacks: Arc<CallbackRegistry>,
}

impl SchedulerCheckInProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        schedules: Arc<dyn ScheduleProvider>,
        callbacks: Arc<CallbackRegistry>,
    ) -> Self {
        Self {
            store,
            schedules,
            callbacks,
        }
    }
}

#[async_trait]
impl CheckInProcessor for SchedulerCheckInProcessor {
    async fn process(&self, task: &Task, _data: &str) -> Result<()> {
        let execution = self.store.get_execution(task.execution_id).await?;
        if execution.vendor_type != VENDOR_TYPE_SCHEDULER {
            return Err(ReplicationError::Validation(format!(
                "the vendor type of execution {} isn't {}: {}",
                task.execution_id, VENDOR_TYPE_SCHEDULER, execution.vendor_type
            )));
        }
        let schedule = self.schedules.get(execution.vendor_id).await?;
        let callback = self.callbacks.get(&schedule.callback_func_name)?;
        tracing::debug!(
            schedule_id = schedule.id,
            callback = %schedule.callback_func_name,
            "schedule triggered"
        );
        callback.call(&schedule.callback_func_param).await
    }
}

/// Starts the replication of the policy whose id is the schedule parameter
pub struct ReplicationCallback {
    policies: Arc<dyn PolicyProvider>,
    controller: ReplicationController,
}

impl ReplicationCallback {
    pub fn new(policies: Arc<dyn PolicyProvider>, controller: ReplicationController) -> Self {
        Self {
            policies,
            controller,
        }
    }
}

fn policy_id(param: &Value) -> Result<i64> {
    match param {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ReplicationError::Validation(format!("invalid policy id: {}", param)))
}

#[async_trait]
impl SchedulerCallback for ReplicationCallback {
    async fn call(&self, param: &Value) -> Result<()> {
        let policy = self.policies.get(policy_id(param)?).await?;
        let execution_id = self.controller.start(&policy, None, TRIGGER_SCHEDULE).await?;
        tracing::info!(policy_id = policy.id, execution_id, "scheduled replication started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::dao::{ExecutionRecord, MemoryStore};
    use crate::task::Status;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        params: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl SchedulerCallback for Recorder {
        async fn call(&self, param: &Value) -> Result<()> {
            self.params.lock().unwrap().push(param.clone());
            Ok(())
        }
    }

    struct OneSchedule;

    #[async_trait]
    impl ScheduleProvider for OneSchedule {
        async fn get(&self, id: i64) -> Result<Schedule> {
            Ok(Schedule {
                id,
                cron: "0 0 * * * *".to_string(),
                callback_func_name: "GC_CALLBACK".to_string(),
                callback_func_param: json!({"delete_untagged": true}),
            })
        }
    }

    async fn execution(store: &MemoryStore, vendor_type: &str) -> i64 {
        store
            .create_execution(ExecutionRecord {
                id: 0,
                vendor_type: vendor_type.to_string(),
                vendor_id: 5,
                status: Status::Running,
                status_message: String::new(),
                trigger: "SCHEDULE".to_string(),
                extra_attrs: String::new(),
                start_time: Utc::now(),
                end_time: None,
            })
            .await
            .unwrap()
    }

    fn task(execution_id: i64) -> Task {
        let now = Utc::now();
        Task {
            id: 1,
            execution_id,
            job_id: None,
            status: Status::Running,
            status_code: 2,
            status_revision: 1,
            status_message: String::new(),
            retry_count: 0,
            extra_attrs: Default::default(),
            start_time: now,
            update_time: now,
            end_time: None,
        }
    }

    #[test]
    fn test_callback_registration() {
        let registry = CallbackRegistry::new();
        let recorder = Arc::new(Recorder::default());
        assert!(matches!(
            registry.register("", recorder.clone()),
            Err(ReplicationError::Validation(_))
        ));
        registry.register("GC_CALLBACK", recorder.clone()).unwrap();
        assert!(matches!(
            registry.register("GC_CALLBACK", recorder),
            Err(ReplicationError::Conflict(_))
        ));
        assert!(registry.contains("GC_CALLBACK"));
        assert!(matches!(registry.get("missing"), Err(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_check_in_invokes_named_callback() {
        let store = Arc::new(MemoryStore::new());
        let execution_id = execution(&store, VENDOR_TYPE_SCHEDULER).await;
        let callbacks = Arc::new(CallbackRegistry::new());
        let recorder = Arc::new(Recorder::default());
        callbacks.register("GC_CALLBACK", recorder.clone()).unwrap();
        let processor = SchedulerCheckInProcessor::new(store, Arc::new(OneSchedule), callbacks);

        processor.process(&task(execution_id), "tick").await.unwrap();
        assert_eq!(
            recorder.params.lock().unwrap().clone(),
            vec![json!({"delete_untagged": true})]
        );
    }

    #[tokio::test]
    async fn test_check_in_rejects_other_vendor_types() {
        let store = Arc::new(MemoryStore::new());
        let execution_id = execution(&store, "REPLICATION").await;
        let processor = SchedulerCheckInProcessor::new(
            store,
            Arc::new(OneSchedule),
            Arc::new(CallbackRegistry::new()),
        );
        let err = processor.process(&task(execution_id), "tick").await.unwrap_err();
        assert!(matches!(err, ReplicationError::Validation(_)));
    }

    #[test]
    fn test_policy_id_param() {
        assert_eq!(policy_id(&json!(7)).unwrap(), 7);
        assert_eq!(policy_id(&json!("8")).unwrap(), 8);
        assert!(policy_id(&json!(null)).is_err());
    }
}
