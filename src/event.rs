//! Event-based triggering: pushes and deletions on the local registry

use crate::controller::ReplicationController;
use crate::error::{ReplicationError, Result};
use crate::filter::filter_resources;
use crate::model::{Policy, PolicyProvider, Resource};
use crate::task::TRIGGER_EVENT;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ArtifactPush,
    ArtifactDelete,
    TagDelete,
}

impl EventType {
    pub fn is_deletion(&self) -> bool {
        matches!(self, EventType::ArtifactDelete | EventType::TagDelete)
    }
}

/// Something happened to `resource` on the local registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub resource: Resource,
}

pub struct EventHandler {
    policies: Arc<dyn PolicyProvider>,
    controller: ReplicationController,
}

impl EventHandler {
    pub fn new(policies: Arc<dyn PolicyProvider>, controller: ReplicationController) -> Self {
        Self {
            policies,
            controller,
        }
    }

    /// Starts every policy the event concerns and returns the execution ids.
    ///
    /// A policy that fails to start is logged and skipped.
    pub async fn handle(&self, event: Event) -> Result<Vec<i64>> {
        if event.resource.artifacts.iter().all(|artifact| artifact.tags.is_empty()) {
            return Err(ReplicationError::Validation(format!(
                "the event of {} carries no tags",
                event.resource.name()
            )));
        }
        let mut resource = event.resource;
        if event.event_type.is_deletion() {
            resource.deleted = true;
            resource.is_delete_tag = event.event_type == EventType::TagDelete;
        }

        let policies = self.related_policies(&resource).await?;
        if policies.is_empty() {
            tracing::debug!(repository = %resource.name(), "no policy is related to the event");
            return Ok(Vec::new());
        }

        let mut executions = Vec::with_capacity(policies.len());
        for policy in policies {
            match self
                .controller
                .start(&policy, Some(resource.clone()), TRIGGER_EVENT)
                .await
            {
                Ok(id) => {
                    tracing::info!(
                        policy_id = policy.id,
                        execution_id = id,
                        "event triggered replication started"
                    );
                    executions.push(id);
                }
                Err(e) => {
                    tracing::error!(
                        policy_id = policy.id,
                        error = %e,
                        "failed to start the event triggered replication"
                    );
                }
            }
        }
        Ok(executions)
    }

    /// Enabled event-based policies pushing from the local registry whose
    /// filters keep the resource; deletions only reach policies replicating them
    pub async fn related_policies(&self, resource: &Resource) -> Result<Vec<Policy>> {
        let mut related = Vec::new();
        for policy in self.policies.list().await? {
            if !policy.enabled || !policy.is_event_based() || !policy.is_src_local() {
                continue;
            }
            if resource.deleted && !policy.replicate_deletion {
                continue;
            }
            match filter_resources(vec![resource.clone()], &policy.filters) {
                Ok(kept) if !kept.is_empty() => related.push(policy),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        policy_id = policy.id,
                        error = %e,
                        "skipped the policy with invalid filters"
                    );
                }
            }
        }
        Ok(related)
    }
}
