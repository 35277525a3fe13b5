//! In-process job system running jobs on the tokio runtime
//!
//! Every submitted job reports `RUNNING` and then its final status to the
//! [`HookHandler`], the same way a remote job service calls back.

use super::{Job, JobLogger, JobSubmitter, Parameters, StatusChange, StopChecker};
use crate::common::KeyedRegistry;
use crate::error::{ReplicationError, Result};
use crate::task::{HookHandler, Status};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// What a running job can see of its environment
#[derive(Clone)]
pub struct JobContext {
    task_id: i64,
    logger: JobLogger,
    stopped: Arc<AtomicBool>,
    hook: Arc<HookHandler>,
    revision: Arc<AtomicI64>,
}

impl JobContext {
    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    pub fn should_stop(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop_checker(&self) -> StopChecker {
        let stopped = Arc::clone(&self.stopped);
        Arc::new(move || stopped.load(Ordering::SeqCst))
    }

    /// Reports mid-flight data to the check-in processor of the task's vendor
    pub async fn check_in(&self, data: impl Into<String>) -> Result<()> {
        self.hook
            .handle(self.task_id, StatusChange::check_in(Status::Running, data))
            .await
    }

    async fn report(&self, status: Status, message: Option<String>) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let mut change = StatusChange::new(status, revision);
        change.message = message;
        if let Err(e) = self.hook.handle(self.task_id, change).await {
            tracing::error!(
                task_id = self.task_id,
                status = %status,
                error = %e,
                "failed to report job status"
            );
        }
    }
}

/// The body of a named job
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, ctx: &JobContext, parameters: &Parameters) -> Result<()>;
}

/// Logs of finished jobs kept for [`JobSubmitter::get_log`] by default
pub const DEFAULT_LOG_RETENTION: usize = 1000;

#[derive(Default)]
struct Jobs {
    /// Stop flags of the jobs still running
    running: HashMap<String, Arc<AtomicBool>>,
    logs: HashMap<String, JobLogger>,
    /// Finished job ids, oldest first
    finished: VecDeque<String>,
}

impl Jobs {
    /// Drops the stop flag and evicts the oldest logs beyond `retention`
    fn finish(&mut self, job_id: &str, retention: usize) {
        self.running.remove(job_id);
        self.finished.push_back(job_id.to_string());
        while self.finished.len() > retention {
            if let Some(evicted) = self.finished.pop_front() {
                self.logs.remove(&evicted);
            }
        }
    }
}

pub struct LocalJobSubmitter {
    hook: Arc<HookHandler>,
    runners: KeyedRegistry<String, Arc<dyn JobRunner>>,
    jobs: Arc<Mutex<Jobs>>,
    log_retention: usize,
}

impl LocalJobSubmitter {
    pub fn new(hook: Arc<HookHandler>) -> Self {
        Self {
            hook,
            runners: KeyedRegistry::new("job runner"),
            jobs: Arc::default(),
            log_retention: DEFAULT_LOG_RETENTION,
        }
    }

    /// How many finished job logs to keep
    pub fn with_log_retention(mut self, log_retention: usize) -> Self {
        self.log_retention = log_retention;
        self
    }

    pub fn register_runner(&mut self, name: &str, runner: Arc<dyn JobRunner>) -> Result<()> {
        self.runners.register(name.to_string(), runner)
    }
}

fn job_not_found(job_id: &str) -> ReplicationError {
    ReplicationError::NotFound(format!("job {} not found", job_id))
}

#[async_trait]
impl JobSubmitter for LocalJobSubmitter {
    async fn submit(&self, task_id: i64, job: &Job) -> Result<String> {
        let runner = Arc::clone(self.runners.get(&job.name)?);
        let job_id = uuid::Uuid::new_v4().simple().to_string();
        let logger = JobLogger::new(job_id.clone());
        let stopped = Arc::new(AtomicBool::new(false));
        {
            let mut jobs = self.jobs.lock().map_err(ReplicationError::poisoned)?;
            jobs.running.insert(job_id.clone(), Arc::clone(&stopped));
            jobs.logs.insert(job_id.clone(), logger.clone());
        }

        let ctx = JobContext {
            task_id,
            logger,
            stopped,
            hook: Arc::clone(&self.hook),
            revision: Arc::new(AtomicI64::new(0)),
        };
        let parameters = job.parameters.clone();
        let name = job.name.clone();
        let jobs = Arc::clone(&self.jobs);
        let retention = self.log_retention;
        let finished_id = job_id.clone();
        tokio::spawn(async move {
            ctx.report(Status::Running, None).await;
            let (status, message) = match runner.run(&ctx, &parameters).await {
                Ok(()) => (Status::Succeeded, None),
                Err(e) if e.is_job_stopped() => {
                    let message = format!("the {} job is stopped", name);
                    ctx.logger.warn(&message);
                    (Status::Stopped, Some(message))
                }
                Err(e) => {
                    let message = format!("the {} job failed: {}", name, e);
                    ctx.logger.error(&message);
                    (Status::Failed, Some(message))
                }
            };
            ctx.report(status, message).await;
            if let Ok(mut jobs) = jobs.lock() {
                jobs.finish(&finished_id, retention);
            }
        });

        tracing::debug!(task_id, job_id = %job_id, job = %job.name, "job submitted");
        Ok(job_id)
    }

    /// Finished jobs ignore the request
    async fn stop(&self, job_id: &str) -> Result<()> {
        let jobs = self.jobs.lock().map_err(ReplicationError::poisoned)?;
        match jobs.running.get(job_id) {
            Some(stopped) => {
                stopped.store(true, Ordering::SeqCst);
                Ok(())
            }
            None if jobs.logs.contains_key(job_id) => Ok(()),
            None => Err(job_not_found(job_id)),
        }
    }

    async fn get_log(&self, job_id: &str) -> Result<Vec<u8>> {
        let jobs = self.jobs.lock().map_err(ReplicationError::poisoned)?;
        jobs.logs
            .get(job_id)
            .map(JobLogger::contents)
            .ok_or_else(|| job_not_found(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::dao::MemoryStore;
    use crate::task::{ExecutionManager, TaskManager, VendorCallbacks};
    use crate::job::{JobMetadata, JobSubmitter};
    use std::time::Duration;

    struct WaitForStop;

    #[async_trait]
    impl JobRunner for WaitForStop {
        async fn run(&self, ctx: &JobContext, _parameters: &Parameters) -> Result<()> {
            ctx.logger().info("waiting");
            loop {
                if ctx.should_stop() {
                    return Err(ReplicationError::JobStopped);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    struct Fails;

    #[async_trait]
    impl JobRunner for Fails {
        async fn run(&self, _ctx: &JobContext, _parameters: &Parameters) -> Result<()> {
            Err(ReplicationError::TransientIo("connection refused".into()))
        }
    }

    fn job(name: &str) -> Job {
        Job {
            name: name.to_string(),
            parameters: Parameters::new(),
            metadata: JobMetadata::generic(),
        }
    }

    async fn wait_for(tasks: &TaskManager, task_id: i64, status: Status) {
        for _ in 0..200 {
            if tasks.get(task_id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} never reached {}", task_id, status);
    }

    #[tokio::test]
    async fn test_jobs_report_through_the_hook() {
        let store = Arc::new(MemoryStore::new());
        let hook = Arc::new(HookHandler::new(store.clone(), Arc::new(VendorCallbacks::new())));
        let mut submitter = LocalJobSubmitter::new(hook);
        submitter.register_runner("WAIT", Arc::new(WaitForStop)).unwrap();
        submitter.register_runner("FAIL", Arc::new(Fails)).unwrap();
        let submitter = Arc::new(submitter);
        let tasks = TaskManager::new(store.clone(), submitter.clone());
        let executions = ExecutionManager::new(store.clone(), Arc::new(tasks.clone()));

        let execution_id = executions
            .create("REPLICATION", 1, "MANUAL", Default::default())
            .await
            .unwrap();
        let waiting = tasks.create(execution_id, &job("WAIT"), Default::default()).await.unwrap();
        let failing = tasks.create(execution_id, &job("FAIL"), Default::default()).await.unwrap();

        wait_for(&tasks, failing, Status::Failed).await;
        wait_for(&tasks, waiting, Status::Running).await;

        tasks.stop(waiting).await.unwrap();
        wait_for(&tasks, waiting, Status::Stopped).await;

        let log = String::from_utf8(tasks.get_log(failing).await.unwrap()).unwrap();
        assert!(log.contains("connection refused"));
        let failed = tasks.get(failing).await.unwrap();
        assert_eq!(failed.status_message, "the FAIL job failed: I/O error: connection refused");
        let stopped = tasks.get(waiting).await.unwrap();
        assert_eq!(stopped.status_message, "the WAIT job is stopped");

        // the execution is refreshed right after the task update
        for _ in 0..200 {
            if executions.get(execution_id).await.unwrap().status == Status::Failed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution never reached FAILED");
    }

    async fn wait_until_released(submitter: &LocalJobSubmitter) {
        for _ in 0..200 {
            if submitter.jobs.lock().unwrap().running.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("finished jobs were never released");
    }

    #[tokio::test]
    async fn test_finished_jobs_are_released() {
        let store = Arc::new(MemoryStore::new());
        let hook = Arc::new(HookHandler::new(store.clone(), Arc::new(VendorCallbacks::new())));
        let mut submitter = LocalJobSubmitter::new(hook).with_log_retention(1);
        submitter.register_runner("FAIL", Arc::new(Fails)).unwrap();
        let submitter = Arc::new(submitter);
        let tasks = TaskManager::new(store.clone(), submitter.clone());
        let executions = ExecutionManager::new(store.clone(), Arc::new(tasks.clone()));
        let execution_id = executions
            .create("REPLICATION", 1, "MANUAL", Default::default())
            .await
            .unwrap();

        let first = tasks.create(execution_id, &job("FAIL"), Default::default()).await.unwrap();
        wait_for(&tasks, first, Status::Failed).await;
        wait_until_released(&submitter).await;
        let first_job = tasks.get(first).await.unwrap().job_id.unwrap();
        assert!(!submitter.get_log(&first_job).await.unwrap().is_empty());
        // stopping a finished job is a no-op
        submitter.stop(&first_job).await.unwrap();

        let second = tasks.create(execution_id, &job("FAIL"), Default::default()).await.unwrap();
        wait_for(&tasks, second, Status::Failed).await;
        wait_until_released(&submitter).await;
        let second_job = tasks.get(second).await.unwrap().job_id.unwrap();

        assert!(submitter.get_log(&first_job).await.unwrap_err().is_not_found());
        assert!(!submitter.get_log(&second_job).await.unwrap().is_empty());
        let jobs = submitter.jobs.lock().unwrap();
        assert_eq!(jobs.logs.len(), 1);
        assert_eq!(jobs.finished.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job_name_fails_submission() {
        let store = Arc::new(MemoryStore::new());
        let hook = Arc::new(HookHandler::new(store, Arc::new(VendorCallbacks::new())));
        let submitter = LocalJobSubmitter::new(hook);
        assert!(submitter.submit(1, &job("NOPE")).await.is_err());
        assert!(submitter.stop("missing").await.unwrap_err().is_not_found());
    }
}
