//! Executions and tasks
//!
//! An [`Execution`] is one run of a vendor action (a replication policy, a
//! garbage collection, ...) and owns the [`Task`]s doing the actual work. Task
//! status changes arrive asynchronously through the [`HookHandler`]; the
//! execution status is derived from its tasks unless it has none.

pub mod dao;
pub mod execution;
pub mod hook;
pub mod manager;
pub mod model;
pub mod query;

pub use dao::{MemoryStore, Store};
pub use execution::ExecutionManager;
pub use hook::{
    CheckInProcessor, ExecutionStatusChangeHook, HookHandler, TaskStatusChangeHook,
    VendorCallbacks,
};
pub use manager::TaskManager;
pub use model::{
    Execution, ExtraAttrs, Metrics, Status, Task, TRIGGER_EVENT, TRIGGER_MANUAL,
    TRIGGER_SCHEDULE, VENDOR_TYPE_REPLICATION, VENDOR_TYPE_SCHEDULER,
};
pub use query::Query;
