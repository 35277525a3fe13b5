//! Registry endpoints taking part in replication

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The local Harbor instance is always registry 0
pub const LOCAL_REGISTRY_ID: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryType {
    Harbor,
    DockerHub,
    DockerRegistry,
    ChartMuseum,
    Quay,
    Gitlab,
}

impl RegistryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryType::Harbor => "harbor",
            RegistryType::DockerHub => "docker-hub",
            RegistryType::DockerRegistry => "docker-registry",
            RegistryType::ChartMuseum => "chart-museum",
            RegistryType::Quay => "quay",
            RegistryType::Gitlab => "gitlab",
        }
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access credential for a registry
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "type", default)]
    pub credential_type: String,
    pub access_key: String,
    pub access_secret: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("credential_type", &self.credential_type)
            .field("access_key", &self.access_key)
            .field("access_secret", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn is_empty(&self) -> bool {
        self.access_key.is_empty() && self.access_secret.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    pub url: String,
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub insecure: bool,
}

impl Registry {
    pub fn new(id: i64, registry_type: RegistryType, url: impl Into<String>) -> Self {
        Self {
            id,
            name: String::new(),
            registry_type,
            url: url.into(),
            credential: None,
            insecure: false,
        }
    }

    /// The local Harbor registry served at `url`
    pub fn local(url: impl Into<String>) -> Self {
        let mut registry = Self::new(LOCAL_REGISTRY_ID, RegistryType::Harbor, url);
        registry.name = "Local".to_string();
        registry
    }

    pub fn with_credential(mut self, access_key: &str, access_secret: &str) -> Self {
        self.credential = Some(Credential {
            credential_type: "basic".to_string(),
            access_key: access_key.to_string(),
            access_secret: access_secret.to_string(),
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ReplicationError::Validation(format!(
                "invalid registry URL: {}. Must start with http:// or https://",
                self.url
            )));
        }
        Ok(())
    }
}
