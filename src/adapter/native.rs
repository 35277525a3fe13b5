//! Adapter for registries speaking the Docker Registry HTTP API v2
//!
//! Lists repositories through `/v2/_catalog` (following `Link` pagination) and
//! tags through `/v2/<name>/tags/list`. When the name filter spells out the
//! repositories exactly, the catalog is skipped.

use super::{Adapter, AdapterFactory, FilterStyle, HealthStatus, RegistryInfo};
use crate::concurrency::LimitedConcurrentRunner;
use crate::error::{ReplicationError, Result};
use crate::filter::FilterChain;
use crate::model::resource::REPOSITORY_TYPE_OCI_REGISTRY;
use crate::model::{
    Artifact, Filter, FilterType, Registry, RegistryType, Resource, ResourceType, TriggerType,
};
use crate::pattern::specific_paths;
use async_trait::async_trait;
use reqwest::header::LINK;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const CATALOG_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Builds [`NativeAdapter`]s
#[derive(Debug, Clone)]
pub struct NativeAdapterFactory {
    timeout: Duration,
    concurrency: usize,
}

impl Default for NativeAdapterFactory {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            concurrency: crate::concurrency::DEFAULT_CONCURRENCY,
        }
    }
}

impl NativeAdapterFactory {
    pub fn new(timeout: Duration, concurrency: usize) -> Self {
        Self {
            timeout,
            concurrency,
        }
    }
}

impl AdapterFactory for NativeAdapterFactory {
    fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        let adapter = NativeAdapter::builder(registry.clone())
            .with_timeout(self.timeout)
            .with_concurrency(self.concurrency)
            .build()?;
        Ok(Arc::new(adapter))
    }
}

pub struct NativeAdapterBuilder {
    registry: Registry,
    timeout: Duration,
    concurrency: usize,
}

impl NativeAdapterBuilder {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn build(self) -> Result<NativeAdapter> {
        self.registry.validate()?;
        let mut builder = Client::builder().timeout(self.timeout);
        if self.registry.insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let client = builder.build()?;
        Ok(NativeAdapter {
            base_url: self.registry.url.trim_end_matches('/').to_string(),
            registry: self.registry,
            client,
            runner: LimitedConcurrentRunner::new(self.concurrency),
        })
    }
}

pub struct NativeAdapter {
    registry: Registry,
    base_url: String,
    client: Client,
    runner: LimitedConcurrentRunner,
}

impl NativeAdapter {
    pub fn builder(registry: Registry) -> NativeAdapterBuilder {
        NativeAdapterBuilder {
            registry,
            timeout: Duration::from_secs(300),
            concurrency: crate::concurrency::DEFAULT_CONCURRENCY,
        }
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.registry.credential {
            Some(credential) if !credential.is_empty() => {
                request.basic_auth(&credential.access_key, Some(&credential.access_secret))
            }
            _ => request,
        }
    }

    /// Checks connectivity only; 401 and 403 still prove the registry is there
    async fn ping_simple(&self) -> Result<()> {
        let response = self.get(&format!("{}/v2/", self.base_url)).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(()),
            status => Err(ReplicationError::TransientIo(format!(
                "unexpected status {} pinging {}",
                status, self.base_url
            ))),
        }
    }

    async fn ping(&self) -> Result<()> {
        let response = self.get(&format!("{}/v2/", self.base_url)).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ReplicationError::TransientIo(format!(
                "unexpected status {} pinging {}",
                response.status(),
                self.base_url
            )))
        }
    }

    /// All repositories in the catalog
    pub async fn catalog(&self) -> Result<Vec<String>> {
        let mut repositories = Vec::new();
        let mut next = Some(format!("{}/v2/_catalog?n={}", self.base_url, CATALOG_PAGE_SIZE));
        while let Some(url) = next {
            let response = self.get(&url).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ReplicationError::TransientIo(format!(
                    "failed to list catalog of {} (status {}): {}",
                    self.base_url, status, body
                )));
            }
            next = match response.headers().get(LINK).and_then(|v| v.to_str().ok()) {
                Some(link) => next_page_url(&self.base_url, link)?,
                None => None,
            };
            let page: CatalogResponse = response.json().await?;
            repositories.extend(page.repositories.unwrap_or_default());
        }
        Ok(repositories)
    }

    /// Tags of `repository`; a missing repository has no tags
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/{}/tags/list", self.base_url, repository);
        let response = self.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(repository, "repository not found, no tags to list");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReplicationError::TransientIo(format!(
                "failed to list tags for {} (status {}): {}",
                repository, status, body
            )));
        }
        let tags: TagsResponse = response.json().await?;
        Ok(tags.tags.unwrap_or_default())
    }

    async fn repositories(&self, filters: &[Filter]) -> Result<Vec<String>> {
        let name_pattern = filters
            .iter()
            .find(|filter| filter.filter_type == FilterType::Name)
            .map(|filter| filter.value.as_str())
            .unwrap_or_default();
        match specific_paths(name_pattern) {
            Some(paths) => Ok(paths),
            None => self.catalog().await,
        }
    }
}

/// Resolves the `rel="next"` target of a `Link` header against the registry URL
fn next_page_url(base_url: &str, link: &str) -> Result<Option<String>> {
    for part in link.split(',') {
        let part = part.trim();
        if !part.contains("rel=\"next\"") {
            continue;
        }
        let (Some(start), Some(end)) = (part.find('<'), part.find('>')) else {
            continue;
        };
        if end <= start + 1 {
            continue;
        }
        let target = &part[start + 1..end];
        let base = url::Url::parse(&format!("{}/", base_url))?;
        return Ok(Some(base.join(target)?.to_string()));
    }
    Ok(None)
}

#[async_trait]
impl Adapter for NativeAdapter {
    async fn info(&self) -> Result<RegistryInfo> {
        Ok(RegistryInfo {
            registry_type: RegistryType::DockerRegistry,
            description: "Docker Registry HTTP API v2".to_string(),
            supported_resource_types: vec![ResourceType::Image],
            supported_resource_filters: vec![
                FilterStyle::input(FilterType::Name),
                FilterStyle::input(FilterType::Tag),
            ],
            supported_triggers: vec![TriggerType::Manual, TriggerType::Scheduled],
        })
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let has_credential = self
            .registry
            .credential
            .as_ref()
            .is_some_and(|credential| !credential.is_empty());
        let result = if has_credential {
            self.ping().await
        } else {
            self.ping_simple().await
        };
        match result {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::error!(url = %self.registry.url, error = %e, "failed to ping registry");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    async fn prepare_for_push(&self, _resources: &[Resource]) -> Result<()> {
        Ok(())
    }

    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let name_filters: Vec<Filter> = filters
            .iter()
            .filter(|filter| filter.filter_type == FilterType::Name)
            .cloned()
            .collect();
        let name_chain = FilterChain::build(&name_filters)?;
        let chain = FilterChain::build(filters)?;

        let candidates: Vec<Resource> = self
            .repositories(filters)
            .await?
            .into_iter()
            .map(|name| {
                let mut resource = Resource::new(ResourceType::Image, name);
                resource.repository.repository_type = REPOSITORY_TYPE_OCI_REGISTRY.to_string();
                resource.registry = Some(self.registry.clone());
                resource
            })
            .collect();
        let candidates = name_chain.apply(candidates);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let resources = self
            .runner
            .run(candidates, |mut resource: Resource| async move {
                let tags = self.list_tags(resource.name()).await.map_err(|e| {
                    ReplicationError::TransientIo(format!(
                        "list tags for repository {} error: {}",
                        resource.name(),
                        e
                    ))
                })?;
                resource.artifacts = tags
                    .into_iter()
                    .map(|tag| Artifact::with_tags([tag]))
                    .collect();
                Ok(resource)
            })
            .await?;

        // repositories without surviving tags drop out here
        Ok(chain.apply(resources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves canned JSON bodies keyed by request path, one request per connection
    async fn serve(routes: Vec<(&'static str, u16, &'static str, Option<&'static str>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body, link) = routes
                        .iter()
                        .find(|(route, ..)| *route == path)
                        .map(|(_, status, body, link)| (*status, *body, *link))
                        .unwrap_or((404, "{}", None));
                    let link_header = link
                        .map(|l| format!("Link: {}\r\n", l))
                        .unwrap_or_default();
                    let response = format!(
                        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        link_header,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn adapter(url: &str) -> NativeAdapter {
        NativeAdapter::builder(Registry::new(1, RegistryType::DockerRegistry, url))
            .with_concurrency(2)
            .build()
            .unwrap()
    }

    #[test]
    fn test_next_page_url() {
        let link = r#"</v2/_catalog?last=b&n=1000>; rel="next""#;
        assert_eq!(
            next_page_url("https://reg.example.com", link).unwrap(),
            Some("https://reg.example.com/v2/_catalog?last=b&n=1000".to_string())
        );
        assert_eq!(next_page_url("https://reg.example.com", r#"<x>; rel="prev""#).unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_artifacts_walks_catalog_and_filters() {
        let url = serve(vec![
            (
                "/v2/_catalog?n=1000",
                200,
                r#"{"repositories":["library/a","library/b"]}"#,
                Some(r#"</v2/_catalog?last=library/b&n=1000>; rel="next""#),
            ),
            (
                "/v2/_catalog?last=library/b&n=1000",
                200,
                r#"{"repositories":["other/c"]}"#,
                None,
            ),
            ("/v2/library/a/tags/list", 200, r#"{"name":"library/a","tags":["1.0","dev"]}"#, None),
            ("/v2/library/b/tags/list", 200, r#"{"name":"library/b","tags":["dev"]}"#, None),
        ])
        .await;

        let adapter = adapter(&url);
        let filters = vec![
            Filter::new(FilterType::Name, "library/*"),
            Filter::new(FilterType::Tag, "1.*"),
        ];
        let resources = adapter.fetch_artifacts(&filters).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name(), "library/a");
        assert_eq!(resources[0].artifacts.len(), 1);
        assert_eq!(resources[0].artifacts[0].tags, vec!["1.0"]);
        assert_eq!(resources[0].registry.as_ref().map(|r| r.id), Some(1));
    }

    #[tokio::test]
    async fn test_specific_name_skips_catalog() {
        let url = serve(vec![(
            "/v2/library/hello/tags/list",
            200,
            r#"{"name":"library/hello","tags":["latest"]}"#,
            None,
        )])
        .await;

        let adapter = adapter(&url);
        let filters = vec![Filter::new(FilterType::Name, "library/hello")];
        let resources = adapter.fetch_artifacts(&filters).await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].artifacts[0].tags, vec!["latest"]);
    }

    #[tokio::test]
    async fn test_health_check_accepts_unauthorized() {
        let url = serve(vec![("/v2/", 401, "{}", None)]).await;
        assert_eq!(adapter(&url).health_check().await.unwrap(), HealthStatus::Healthy);

        let url = serve(vec![("/v2/", 500, "{}", None)]).await;
        assert_eq!(adapter(&url).health_check().await.unwrap(), HealthStatus::Unhealthy);
    }
}
