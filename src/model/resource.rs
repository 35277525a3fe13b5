//! Replicable content: repositories and their artifacts

use super::registry::Registry;
use crate::error::ReplicationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Repository types a registry can host
pub const REPOSITORY_TYPE_CHART_MUSEUM: &str = "CHART_MUSEUM";
pub const REPOSITORY_TYPE_OCI_REGISTRY: &str = "OCI_REGISTRY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Chart,
    Artifact,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Chart => "chart",
            ResourceType::Artifact => "artifact",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ResourceType::Image),
            "chart" => Ok(ResourceType::Chart),
            "artifact" => Ok(ResourceType::Artifact),
            other => Err(ReplicationError::Validation(format!(
                "unknown resource type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Chart museum repository or registry repository
    #[serde(rename = "type", default)]
    pub repository_type: String,
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type", default)]
    pub artifact_type: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Artifact {
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// The general replicating content.
///
/// A resource with `deleted` set is a tombstone: only the repository name and
/// the tags to remove are meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub registry: Option<Registry>,
    pub repository: Repository,
    #[serde(rename = "artifact", default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub extended_info: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub deleted: bool,
    /// Only a single tag is removed rather than the whole repository
    #[serde(default)]
    pub is_delete_tag: bool,
    /// Whether existing content on the destination may be overwritten.
    /// `None` means "not decided upstream", the policy decides.
    #[serde(rename = "override", default)]
    pub override_existing: Option<bool>,
}

impl Resource {
    pub fn new(resource_type: ResourceType, repository: impl Into<String>) -> Self {
        Self {
            resource_type,
            registry: None,
            repository: Repository::new(repository),
            artifacts: Vec::new(),
            extended_info: BTreeMap::new(),
            deleted: false,
            is_delete_tag: false,
            override_existing: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn name(&self) -> &str {
        &self.repository.name
    }

    pub fn should_override(&self) -> bool {
        self.override_existing.unwrap_or(false)
    }

    /// Human readable name used in task listings, e.g. `library/hello [2 item(s) in total]`
    pub fn display_name(&self) -> String {
        let count: usize = self
            .artifacts
            .iter()
            .map(|artifact| {
                if !artifact.tags.is_empty() {
                    artifact.tags.len()
                } else if !artifact.digest.is_empty() {
                    1
                } else {
                    0
                }
            })
            .sum();
        format!("{} [{} item(s) in total]", self.repository.name, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_counts_tags_and_digests() {
        let resource = Resource::new(ResourceType::Image, "library/hello")
            .with_artifact(Artifact::with_tags(["1.0", "latest"]))
            .with_artifact(Artifact {
                digest: "sha256:abc".to_string(),
                ..Default::default()
            })
            .with_artifact(Artifact::default());
        assert_eq!(resource.display_name(), "library/hello [3 item(s) in total]");
    }

    #[test]
    fn test_resource_json_shape() {
        let mut resource = Resource::new(ResourceType::Chart, "library/harbor")
            .with_artifact(Artifact::with_tags(["0.2.0"]));
        resource.override_existing = Some(true);
        let value = serde_json::to_value(&resource).unwrap();
        assert_eq!(value["type"], "chart");
        assert_eq!(value["repository"]["name"], "library/harbor");
        assert_eq!(value["artifact"][0]["tags"][0], "0.2.0");
        assert_eq!(value["override"], true);

        let decoded: Resource = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, resource);
    }

    #[test]
    fn test_resource_type_parse() {
        assert_eq!("chart".parse::<ResourceType>().unwrap(), ResourceType::Chart);
        assert!("helm".parse::<ResourceType>().is_err());
    }
}
