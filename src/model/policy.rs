//! Replication policies: what to replicate, from where, to where and when

use super::registry::{LOCAL_REGISTRY_ID, Registry};
use super::resource::ResourceType;
use crate::error::{ReplicationError, Result};
use crate::pattern::Pattern;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Resource,
    Name,
    Tag,
    Label,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub value: String,
}

impl Filter {
    pub fn new(filter_type: FilterType, value: impl Into<String>) -> Self {
        Self {
            filter_type,
            value: value.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.filter_type {
            FilterType::Resource => self.value.parse::<ResourceType>().map(|_| ()),
            FilterType::Name | FilterType::Tag | FilterType::Label => {
                Pattern::new(&self.value).map(|_| ())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    EventBased,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    #[serde(default)]
    pub cron: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub settings: Option<TriggerSettings>,
}

impl Trigger {
    pub fn manual() -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            settings: None,
        }
    }

    pub fn event_based() -> Self {
        Self {
            trigger_type: TriggerType::EventBased,
            settings: None,
        }
    }

    pub fn scheduled(cron: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Scheduled,
            settings: Some(TriggerSettings { cron: cron.into() }),
        }
    }
}

/// A replication rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    /// `None` means the local registry
    #[serde(default)]
    pub src_registry: Option<Registry>,
    /// `None` means the local registry
    #[serde(default)]
    pub dest_registry: Option<Registry>,
    /// Flat namespace every replicated repository lands in, empty keeps the source name
    #[serde(default)]
    pub dest_namespace: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(rename = "deletion", default)]
    pub replicate_deletion: bool,
    #[serde(rename = "override", default)]
    pub override_existing: bool,
}

fn is_local(registry: &Option<Registry>) -> bool {
    registry
        .as_ref()
        .map_or(true, |registry| registry.id == LOCAL_REGISTRY_ID)
}

impl Policy {
    pub fn is_src_local(&self) -> bool {
        is_local(&self.src_registry)
    }

    pub fn is_dest_local(&self) -> bool {
        is_local(&self.dest_registry)
    }

    pub fn is_event_based(&self) -> bool {
        matches!(
            self.trigger.as_ref().map(|t| t.trigger_type),
            Some(TriggerType::EventBased)
        )
    }

    pub fn validate(&self) -> Result<()> {
        match (self.is_src_local(), self.is_dest_local()) {
            (true, true) => {
                return Err(ReplicationError::Validation(
                    "either the source registry or the destination registry must be a remote registry"
                        .to_string(),
                ));
            }
            (false, false) => {
                return Err(ReplicationError::Validation(
                    "one of the source registry and the destination registry must be the local registry"
                        .to_string(),
                ));
            }
            _ => {}
        }
        for registry in self.src_registry.iter().chain(self.dest_registry.iter()) {
            registry.validate()?;
        }
        if self.dest_namespace.contains('/') {
            return Err(ReplicationError::Validation(format!(
                "invalid destination namespace: {}",
                self.dest_namespace
            )));
        }
        for filter in &self.filters {
            filter.validate()?;
        }
        if let Some(trigger) = &self.trigger {
            let has_cron = trigger
                .settings
                .as_ref()
                .is_some_and(|settings| !settings.cron.trim().is_empty());
            if trigger.trigger_type == TriggerType::Scheduled && !has_cron {
                return Err(ReplicationError::Validation(
                    "the cron string cannot be empty when the trigger type is scheduled"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Read access to the configured policies
#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn get(&self, id: i64) -> Result<Policy>;
    async fn list(&self) -> Result<Vec<Policy>>;
}
