//! Replication data model: registries, policies and resources

pub mod policy;
pub mod registry;
pub mod resource;

pub use policy::{Filter, FilterType, Policy, PolicyProvider, Trigger, TriggerSettings, TriggerType};
pub use registry::{Credential, LOCAL_REGISTRY_ID, Registry, RegistryType};
pub use resource::{Artifact, Repository, Resource, ResourceType};
