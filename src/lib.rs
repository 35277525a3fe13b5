//! Harbor Replication Library
//!
//! Replicates container artifacts between registries according to
//! user-defined policies. A policy names a source and a destination (one of
//! them is always the local registry), filters, a trigger and flags such as
//! override and deletion replication.
//!
//! The engine is split into:
//! - [`model`], [`pattern`] and [`filter`]: policies, resources and the
//!   filter chain that selects what to replicate
//! - [`adapter`] and [`transfer`]: pluggable registry access and data movement
//! - [`task`]: the execution/task store and the status state machine
//! - [`job`]: job submission and the replication job body
//! - [`flow`] and [`controller`]: turning a policy run into tasks
//! - [`scheduler`] and [`event`]: scheduled and event-based triggering
//! - [`engine`]: wiring everything together

pub mod adapter;
pub mod cli;
pub mod common;
pub mod concurrency;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod filter;
pub mod flow;
pub mod job;
pub mod logging;
pub mod model;
pub mod pattern;
pub mod scheduler;
pub mod task;
pub mod transfer;

pub use config::ReplicationConfig;
pub use controller::{ReplicationController, ReplicationExecution, ReplicationTask};
pub use engine::{Engine, EngineBuilder};
pub use error::{ReplicationError, Result};
pub use event::{Event, EventHandler, EventType};
pub use model::{Policy, Registry, RegistryType, Resource, ResourceType};
