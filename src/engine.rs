//! Wiring of the replication engine
//!
//! [`EngineBuilder`] collects the pluggable parts (adapters, transfers,
//! vendor callbacks, providers) and builds the object graph in dependency
//! order: store, hook handler, job submitter, managers, flows, controller.

use crate::adapter::native::NativeAdapterFactory;
use crate::adapter::{AdapterFactory, AdapterRegistry};
use crate::config::ReplicationConfig;
use crate::controller::ReplicationController;
use crate::error::Result;
use crate::event::EventHandler;
use crate::flow::FlowController;
use crate::job::{JOB_NAME_REPLICATION, JobSubmitter, LocalJobSubmitter, ReplicationJob};
use crate::model::{PolicyProvider, Registry, RegistryType, ResourceType};
use crate::scheduler::{
    CallbackRegistry, REPLICATION_CALLBACK, ReplicationCallback, ScheduleProvider,
    SchedulerCheckInProcessor,
};
use crate::task::dao::{MemoryStore, Store};
use crate::task::{
    ExecutionManager, HookHandler, TaskManager, VENDOR_TYPE_SCHEDULER, VendorCallbacks,
};
use crate::transfer::{TransferFactory, TransferRegistry};
use std::sync::Arc;

pub struct EngineBuilder {
    config: ReplicationConfig,
    store: Option<Arc<dyn Store>>,
    adapters: AdapterRegistry,
    transfers: TransferRegistry,
    callbacks: VendorCallbacks,
    submitter: Option<Arc<dyn JobSubmitter>>,
    schedules: Option<Arc<dyn ScheduleProvider>>,
    policies: Option<Arc<dyn PolicyProvider>>,
}

impl EngineBuilder {
    pub fn new(config: ReplicationConfig) -> Self {
        Self {
            config,
            store: None,
            adapters: AdapterRegistry::new(),
            transfers: TransferRegistry::new(),
            callbacks: VendorCallbacks::new(),
            submitter: None,
            schedules: None,
            policies: None,
        }
    }

    /// Defaults to a [`MemoryStore`]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_adapter(
        mut self,
        registry_type: RegistryType,
        factory: Arc<dyn AdapterFactory>,
    ) -> Result<Self> {
        self.adapters.register(registry_type, factory)?;
        Ok(self)
    }

    pub fn with_transfer(
        mut self,
        resource_type: ResourceType,
        factory: Arc<dyn TransferFactory>,
    ) -> Result<Self> {
        self.transfers.register(resource_type, factory)?;
        Ok(self)
    }

    /// Hooks of other vendor types sharing the execution and task tables
    pub fn with_vendor_callbacks(mut self, callbacks: VendorCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// An external job system; defaults to running jobs in-process
    pub fn with_job_submitter(mut self, submitter: Arc<dyn JobSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Enables scheduled triggering through the `SCHEDULER` check-in processor
    pub fn with_schedules(mut self, schedules: Arc<dyn ScheduleProvider>) -> Self {
        self.schedules = Some(schedules);
        self
    }

    /// Enables the scheduled replication callback and event-based triggering
    pub fn with_policies(mut self, policies: Arc<dyn PolicyProvider>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn Store> = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let scheduler_callbacks = Arc::new(CallbackRegistry::new());
        let mut callbacks = self.callbacks;
        if let Some(schedules) = self.schedules {
            callbacks.register_check_in_processor(
                VENDOR_TYPE_SCHEDULER,
                Arc::new(SchedulerCheckInProcessor::new(
                    Arc::clone(&store),
                    schedules,
                    Arc::clone(&scheduler_callbacks),
                )),
            )?;
        }
        let hook = Arc::new(HookHandler::new(Arc::clone(&store), Arc::new(callbacks)));

        let submitter: Arc<dyn JobSubmitter> = match self.submitter {
            Some(submitter) => submitter,
            None => {
                let mut local = LocalJobSubmitter::new(Arc::clone(&hook));
                local.register_runner(
                    JOB_NAME_REPLICATION,
                    Arc::new(ReplicationJob::new(Arc::new(self.transfers))),
                )?;
                Arc::new(local)
            }
        };
        let tasks = Arc::new(TaskManager::new(Arc::clone(&store), submitter));
        let executions = ExecutionManager::new(Arc::clone(&store), tasks).with_poll_intervals(
            config.stop_poll_initial_interval(),
            config.stop_poll_max_interval(),
        );

        let mut adapters = self.adapters;
        let registered = adapters.registered_types();
        for registry_type in [RegistryType::DockerRegistry, RegistryType::Harbor] {
            if !registered.contains(&registry_type) {
                adapters.register(
                    registry_type,
                    Arc::new(NativeAdapterFactory::new(
                        config.http_timeout(),
                        config.max_fetch_concurrency,
                    )),
                )?;
            }
        }

        let flows = FlowController::new(
            Arc::new(adapters),
            executions.clone(),
            Registry::local(config.local_registry_url.as_str()),
        );
        let controller = ReplicationController::new(executions.clone(), flows)
            .with_stop_wait_timeout(config.stop_wait_timeout());

        let events = match self.policies {
            Some(policies) => {
                scheduler_callbacks.register(
                    REPLICATION_CALLBACK,
                    Arc::new(ReplicationCallback::new(Arc::clone(&policies), controller.clone())),
                )?;
                Some(EventHandler::new(policies, controller.clone()))
            }
            None => None,
        };

        tracing::debug!(local_registry = %config.local_registry_url, "replication engine built");
        Ok(Engine {
            store,
            hook,
            executions,
            controller,
            scheduler_callbacks,
            events,
        })
    }
}

/// A wired replication engine
pub struct Engine {
    pub store: Arc<dyn Store>,
    /// Entry point for job status changes
    pub hook: Arc<HookHandler>,
    pub executions: ExecutionManager,
    pub controller: ReplicationController,
    /// Callbacks the scheduler can fire by name
    pub scheduler_callbacks: Arc<CallbackRegistry>,
    /// Present when built with a policy provider
    pub events: Option<EventHandler>,
}

impl Engine {
    pub fn builder(config: ReplicationConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }
}
