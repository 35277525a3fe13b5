//! The steps shared by the replication flows

use crate::adapter::{Adapter, AdapterRegistry};
use crate::error::{ReplicationError, Result};
use crate::filter::filter_resources;
use crate::job::{
    JOB_NAME_REPLICATION, Job, JobMetadata, PARAM_DST_RESOURCE, PARAM_SRC_RESOURCE, Parameters,
};
use crate::model::{FilterType, Policy, Registry, Resource, ResourceType};
use crate::task::{ExtraAttrs, TaskManager};
use serde_json::Value;
use std::sync::Arc;

/// Fills the local sides of the policy with the local registry
pub(crate) fn resolve_registries(policy: &Policy, local: &Registry) -> Policy {
    let mut resolved = policy.clone();
    if policy.is_src_local() {
        resolved.src_registry = Some(local.clone());
    }
    if policy.is_dest_local() {
        resolved.dest_registry = Some(local.clone());
    }
    resolved
}

/// Builds the source and destination adapters of a resolved policy
pub(crate) fn initialize(
    adapters: &AdapterRegistry,
    policy: &Policy,
) -> Result<(Arc<dyn Adapter>, Arc<dyn Adapter>)> {
    let src = side(policy.src_registry.as_ref(), "source")?;
    let dst = side(policy.dest_registry.as_ref(), "destination")?;
    let src_adapter = adapters.create(src)?;
    let dst_adapter = adapters.create(dst)?;
    tracing::debug!(policy_id = policy.id, src = %src.url, dst = %dst.url, "adapters initialized");
    Ok((src_adapter, dst_adapter))
}

fn side<'a>(registry: Option<&'a Registry>, name: &str) -> Result<&'a Registry> {
    registry.ok_or_else(|| {
        ReplicationError::Validation(format!("the {} registry is not resolved", name))
    })
}

/// Lists the candidate resources on the source registry.
///
/// Resource filters choose what to fetch; without any, every resource type
/// the adapter supports is fetched. The result is filtered client-side.
pub(crate) async fn fetch_resources(
    adapter: &dyn Adapter,
    policy: &Policy,
) -> Result<Vec<Resource>> {
    let mut resource_types = Vec::new();
    let mut filters = Vec::new();
    for filter in &policy.filters {
        if filter.filter_type == FilterType::Resource {
            if !filter.value.is_empty() {
                resource_types.push(filter.value.parse::<ResourceType>()?);
            }
        } else {
            filters.push(filter.clone());
        }
    }
    if resource_types.is_empty() {
        resource_types = adapter.info().await?.supported_resource_types;
    }

    let fetch_charts = resource_types.contains(&ResourceType::Chart);
    let fetch_artifacts = resource_types.iter().any(|t| *t != ResourceType::Chart);

    let mut resources = Vec::new();
    if fetch_artifacts {
        resources.extend(adapter.fetch_artifacts(&filters).await?);
        tracing::debug!(policy_id = policy.id, "artifacts fetched");
    }
    if fetch_charts {
        resources.extend(adapter.fetch_charts(&filters).await?);
        tracing::debug!(policy_id = policy.id, "charts fetched");
    }
    filter_resources(resources, &policy.filters)
}

/// Stamps the resources with the source registry
pub(crate) fn assemble_source(resources: Vec<Resource>, policy: &Policy) -> Vec<Resource> {
    resources
        .into_iter()
        .map(|mut resource| {
            resource.registry = policy.src_registry.clone();
            resource
        })
        .collect()
}

/// Derives the destination counterpart of every source resource
pub(crate) fn assemble_destination(resources: &[Resource], policy: &Policy) -> Vec<Resource> {
    resources
        .iter()
        .map(|src| {
            let mut dst = src.clone();
            dst.registry = policy.dest_registry.clone();
            dst.repository.name = replace_namespace(&src.repository.name, &policy.dest_namespace);
            dst.override_existing = Some(src.override_existing.unwrap_or(policy.override_existing));
            dst
        })
        .collect()
}

/// `a/b/c` under namespace `n` becomes `n/c`; an empty namespace keeps the name
pub fn replace_namespace(repository: &str, namespace: &str) -> String {
    if namespace.is_empty() {
        return repository.to_string();
    }
    let last = repository.rsplit('/').next().unwrap_or(repository);
    format!("{}/{}", namespace, last)
}

/// Creates one replication task per resource pair, stopping at the first failure
pub(crate) async fn create_tasks<F>(
    tasks: &TaskManager,
    execution_id: i64,
    src_resources: &[Resource],
    dst_resources: &[Resource],
    operation: F,
) -> Result<()>
where
    F: Fn(&Resource) -> &'static str,
{
    for (src, dst) in src_resources.iter().zip(dst_resources) {
        let mut parameters = Parameters::new();
        parameters.insert(
            PARAM_SRC_RESOURCE.to_string(),
            Value::String(serde_json::to_string(src)?),
        );
        parameters.insert(
            PARAM_DST_RESOURCE.to_string(),
            Value::String(serde_json::to_string(dst)?),
        );
        let job = Job {
            name: JOB_NAME_REPLICATION.to_string(),
            parameters,
            metadata: JobMetadata::generic(),
        };

        let mut attrs = ExtraAttrs::new();
        attrs.insert("operation".to_string(), Value::from(operation(dst)));
        attrs.insert("resource_type".to_string(), Value::from(src.resource_type.as_str()));
        attrs.insert("source_resource".to_string(), Value::from(src.display_name()));
        attrs.insert("destination_resource".to_string(), Value::from(dst.display_name()));
        tasks.create(execution_id, &job, attrs).await?;
    }
    Ok(())
}
