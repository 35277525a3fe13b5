//! Fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use harbor_replication::adapter::{Adapter, AdapterFactory, HealthStatus, RegistryInfo};
use harbor_replication::controller::{ReplicationController, ReplicationExecution};
use harbor_replication::error::{ReplicationError, Result};
use harbor_replication::job::{Job, JobLogger, JobSubmitter, StopChecker};
use harbor_replication::model::{
    Artifact, Filter, FilterType, Policy, PolicyProvider, Registry, RegistryType, Resource,
    ResourceType,
};
use harbor_replication::task::Status;
use harbor_replication::transfer::{Transfer, TransferFactory, check_stop};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LOCAL_URL: &str = "http://core:8080";

pub fn image(name: &str, tags: &[&str]) -> Resource {
    Resource::new(ResourceType::Image, name)
        .with_artifact(Artifact::with_tags(tags.iter().copied()))
}

pub fn remote() -> Registry {
    Registry::new(2, RegistryType::Harbor, "https://remote.example.com")
}

/// Pushes everything under `library/` to the remote `dest` namespace
pub fn push_policy(id: i64) -> Policy {
    Policy {
        id,
        name: format!("policy-{}", id),
        enabled: true,
        dest_registry: Some(remote()),
        dest_namespace: "dest".to_string(),
        filters: vec![Filter::new(FilterType::Name, "library/*")],
        ..Default::default()
    }
}

/// Pulls everything under `library/` from the remote registry
pub fn pull_policy(id: i64) -> Policy {
    Policy {
        id,
        name: format!("policy-{}", id),
        enabled: true,
        src_registry: Some(remote()),
        filters: vec![Filter::new(FilterType::Name, "library/*")],
        ..Default::default()
    }
}

/// Serves a fixed resource listing and records what it was asked to prepare
pub struct StaticAdapterFactory {
    resources: Vec<Resource>,
    pub prepared: Arc<Mutex<Vec<String>>>,
}

impl StaticAdapterFactory {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            prepared: Arc::default(),
        }
    }
}

struct StaticAdapter {
    resources: Vec<Resource>,
    prepared: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Adapter for StaticAdapter {
    async fn info(&self) -> Result<RegistryInfo> {
        Ok(RegistryInfo {
            registry_type: RegistryType::Harbor,
            description: "static".to_string(),
            supported_resource_types: vec![ResourceType::Image],
            supported_resource_filters: Vec::new(),
            supported_triggers: Vec::new(),
        })
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }

    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()> {
        let mut prepared = self.prepared.lock().unwrap();
        prepared.extend(resources.iter().map(|resource| resource.name().to_string()));
        Ok(())
    }

    async fn fetch_artifacts(&self, _filters: &[Filter]) -> Result<Vec<Resource>> {
        Ok(self.resources.clone())
    }
}

impl AdapterFactory for StaticAdapterFactory {
    fn create(&self, _registry: &Registry) -> Result<Arc<dyn Adapter>> {
        Ok(Arc::new(StaticAdapter {
            resources: self.resources.clone(),
            prepared: Arc::clone(&self.prepared),
        }))
    }
}

/// Accepts every job and never reports back; stop requests are only recorded
#[derive(Default)]
pub struct HoldingSubmitter {
    pub submitted: Mutex<Vec<i64>>,
    pub stopped: Mutex<Vec<String>>,
}

#[async_trait]
impl JobSubmitter for HoldingSubmitter {
    async fn submit(&self, task_id: i64, _job: &Job) -> Result<String> {
        self.submitted.lock().unwrap().push(task_id);
        Ok(format!("job-{}", task_id))
    }

    async fn stop(&self, job_id: &str) -> Result<()> {
        self.stopped.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn get_log(&self, job_id: &str) -> Result<Vec<u8>> {
        Ok(format!("log of {}", job_id).into_bytes())
    }
}

/// Records every transfer as `(source, destination, deleted)`. With
/// `wait_for_stop` set, transfers block until a stop is requested.
#[derive(Default)]
pub struct RecordingTransferFactory {
    pub transfers: Arc<Mutex<Vec<(String, String, bool)>>>,
    pub wait_for_stop: bool,
}

struct RecordingTransfer {
    transfers: Arc<Mutex<Vec<(String, String, bool)>>>,
    wait_for_stop: bool,
    logger: JobLogger,
    should_stop: StopChecker,
}

#[async_trait]
impl Transfer for RecordingTransfer {
    async fn transfer(&self, src: &Resource, dst: &Resource) -> Result<()> {
        while self.wait_for_stop {
            check_stop(&self.should_stop)?;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.logger.info(&format!("copied {}", src.name()));
        self.transfers.lock().unwrap().push((
            src.name().to_string(),
            dst.name().to_string(),
            dst.deleted,
        ));
        Ok(())
    }
}

impl TransferFactory for RecordingTransferFactory {
    fn create(&self, logger: JobLogger, should_stop: StopChecker) -> Result<Box<dyn Transfer>> {
        Ok(Box::new(RecordingTransfer {
            transfers: Arc::clone(&self.transfers),
            wait_for_stop: self.wait_for_stop,
            logger,
            should_stop,
        }))
    }
}

pub struct StaticPolicies(pub Vec<Policy>);

#[async_trait]
impl PolicyProvider for StaticPolicies {
    async fn get(&self, id: i64) -> Result<Policy> {
        self.0
            .iter()
            .find(|policy| policy.id == id)
            .cloned()
            .ok_or_else(|| ReplicationError::NotFound(format!("policy {} not found", id)))
    }

    async fn list(&self) -> Result<Vec<Policy>> {
        Ok(self.0.clone())
    }
}

/// Polls the execution until `done` holds, for at most 5 seconds
pub async fn wait_for_execution(
    controller: &ReplicationController,
    execution_id: i64,
    done: impl Fn(&ReplicationExecution) -> bool,
) -> ReplicationExecution {
    for _ in 0..500 {
        let execution = controller.get_execution(execution_id).await.unwrap();
        if done(&execution) {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} didn't reach the expected status", execution_id);
}

/// Polls until `count` tasks of the execution succeeded
pub async fn wait_for_succeeded(controller: &ReplicationController, execution_id: i64, count: i64) {
    wait_for_execution(controller, execution_id, |execution| {
        execution.status == Status::Succeeded
            && execution
                .metrics
                .as_ref()
                .is_some_and(|metrics| metrics.succeeded_task_count == count)
    })
    .await;
}

/// Polls until the execution has `count` tasks, for at most 5 seconds
pub async fn wait_for_tasks(controller: &ReplicationController, execution_id: i64, count: i64) {
    use harbor_replication::task::Query;
    for _ in 0..500 {
        let query = Query::new().with_keyword("ExecutionID", execution_id);
        if controller.task_count(&query).await.unwrap() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} didn't get {} tasks", execution_id, count);
}
