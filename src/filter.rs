//! Client-side resource filter chain
//!
//! Filters are applied in policy order and only ever narrow the candidate set.
//! Patterns are compiled once per chain, so a chain can be applied to many
//! resource batches cheaply.

use crate::error::Result;
use crate::model::{Filter, FilterType, Resource, ResourceType};
use crate::pattern::Pattern;

/// One step of the chain
pub trait ResourceFilter: Send + Sync {
    fn apply(&self, resources: Vec<Resource>) -> Vec<Resource>;
}

struct ResourceTypeFilter {
    resource_type: ResourceType,
}

impl ResourceFilter for ResourceTypeFilter {
    fn apply(&self, resources: Vec<Resource>) -> Vec<Resource> {
        resources
            .into_iter()
            .filter(|resource| resource.resource_type == self.resource_type)
            .collect()
    }
}

struct NameFilter {
    pattern: Pattern,
}

impl ResourceFilter for NameFilter {
    fn apply(&self, resources: Vec<Resource>) -> Vec<Resource> {
        resources
            .into_iter()
            .filter(|resource| self.pattern.matches(resource.name()))
            .collect()
    }
}

struct TagFilter {
    pattern: Pattern,
}

impl ResourceFilter for TagFilter {
    fn apply(&self, resources: Vec<Resource>) -> Vec<Resource> {
        resources
            .into_iter()
            .filter_map(|mut resource| {
                resource.artifacts = std::mem::take(&mut resource.artifacts)
                    .into_iter()
                    .filter_map(|mut artifact| {
                        artifact.tags.retain(|tag| self.pattern.matches(tag));
                        (!artifact.tags.is_empty()).then_some(artifact)
                    })
                    .collect();
                (!resource.artifacts.is_empty()).then_some(resource)
            })
            .collect()
    }
}

struct LabelFilter {
    pattern: Pattern,
}

impl ResourceFilter for LabelFilter {
    fn apply(&self, resources: Vec<Resource>) -> Vec<Resource> {
        resources
            .into_iter()
            .filter_map(|mut resource| {
                resource.artifacts.retain(|artifact| {
                    artifact
                        .labels
                        .iter()
                        .any(|label| self.pattern.matches(label))
                });
                (!resource.artifacts.is_empty()).then_some(resource)
            })
            .collect()
    }
}

/// A compiled, ordered filter chain
pub struct FilterChain {
    filters: Vec<Box<dyn ResourceFilter>>,
}

impl FilterChain {
    /// Compiles `filters`. Filters with an empty value are skipped, they keep
    /// everything.
    pub fn build(filters: &[Filter]) -> Result<Self> {
        let mut compiled: Vec<Box<dyn ResourceFilter>> = Vec::with_capacity(filters.len());
        for filter in filters {
            if filter.value.is_empty() {
                continue;
            }
            let step: Box<dyn ResourceFilter> = match filter.filter_type {
                FilterType::Resource => Box::new(ResourceTypeFilter {
                    resource_type: filter.value.parse()?,
                }),
                FilterType::Name => Box::new(NameFilter {
                    pattern: Pattern::new(&filter.value)?,
                }),
                FilterType::Tag => Box::new(TagFilter {
                    pattern: Pattern::new(&filter.value)?,
                }),
                FilterType::Label => Box::new(LabelFilter {
                    pattern: Pattern::new(&filter.value)?,
                }),
            };
            compiled.push(step);
        }
        Ok(Self { filters: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn apply(&self, resources: Vec<Resource>) -> Vec<Resource> {
        self.filters
            .iter()
            .fold(resources, |resources, filter| filter.apply(resources))
    }
}

/// Runs `resources` through `filters`. An empty result is not an error.
pub fn filter_resources(resources: Vec<Resource>, filters: &[Filter]) -> Result<Vec<Resource>> {
    Ok(FilterChain::build(filters)?.apply(resources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Artifact;

    fn chart(name: &str, tags: &[&[&str]]) -> Resource {
        tags.iter().fold(
            Resource::new(ResourceType::Chart, name),
            |resource, tags| resource.with_artifact(Artifact::with_tags(tags.iter().copied())),
        )
    }

    fn names(resources: &[Resource]) -> Vec<&str> {
        resources.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_chain_narrows_in_order() {
        let resources = vec![
            Resource::new(ResourceType::Image, "library/hello-world")
                .with_artifact(Artifact::with_tags(["latest"])),
            chart("library/harbor", &[&["0.2.0"], &["0.3.0"]]),
            chart("library/mysql", &[&["1.0"]]),
        ];
        let filters = vec![
            Filter::new(FilterType::Resource, "chart"),
            Filter::new(FilterType::Name, "library/*"),
            Filter::new(FilterType::Name, "library/harbor"),
            Filter::new(FilterType::Tag, "0.2.?"),
        ];

        let result = filter_resources(resources, &filters).unwrap();
        assert_eq!(names(&result), vec!["library/harbor"]);
        assert_eq!(result[0].artifacts.len(), 1);
        assert_eq!(result[0].artifacts[0].tags, vec!["0.2.0"]);
    }

    #[test]
    fn test_empty_chain_returns_input() {
        let resources = vec![chart("a", &[&["1"]]), chart("b/c", &[])];
        let result = filter_resources(resources.clone(), &[]).unwrap();
        assert_eq!(result, resources);

        let blank = vec![Filter::new(FilterType::Tag, "")];
        assert_eq!(filter_resources(resources.clone(), &blank).unwrap(), resources);
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let resources = vec![
            chart("library/a", &[&["v1", "latest"], &["v2"]]),
            chart("library/b", &[&["dev"]]),
            chart("other/c", &[&["v1"]]),
        ];
        let filters = vec![
            Filter::new(FilterType::Name, "library/**"),
            Filter::new(FilterType::Tag, "v*"),
        ];
        let chain = FilterChain::build(&filters).unwrap();
        let once = chain.apply(resources);
        let twice = chain.apply(once.clone());
        assert_eq!(once, twice);
        assert_eq!(names(&once), vec!["library/a"]);
        assert_eq!(once[0].artifacts.len(), 2);
        assert_eq!(once[0].artifacts[0].tags, vec!["v1"]);
    }

    #[test]
    fn test_everything_filtered_out_is_ok() {
        let resources = vec![chart("library/a", &[&["1.0"]])];
        let filters = vec![Filter::new(FilterType::Name, "prod/*")];
        let result = filter_resources(resources, &filters).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_untagged_artifacts_do_not_survive_tag_filter() {
        let resources = vec![
            Resource::new(ResourceType::Image, "library/a").with_artifact(Artifact {
                digest: "sha256:1".to_string(),
                ..Default::default()
            }),
        ];
        let filters = vec![Filter::new(FilterType::Tag, "**")];
        assert!(filter_resources(resources, &filters).unwrap().is_empty());
    }

    #[test]
    fn test_label_filter_keeps_matching_artifacts() {
        let labelled = |labels: &[&str]| Artifact {
            tags: vec!["t".to_string()],
            labels: labels.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        };
        let resources = vec![
            Resource::new(ResourceType::Image, "library/a")
                .with_artifact(labelled(&["prod", "team-a"]))
                .with_artifact(labelled(&["dev"])),
            Resource::new(ResourceType::Image, "library/b").with_artifact(labelled(&[])),
        ];
        let filters = vec![Filter::new(FilterType::Label, "prod")];
        let result = filter_resources(resources, &filters).unwrap();
        assert_eq!(names(&result), vec!["library/a"]);
        assert_eq!(result[0].artifacts.len(), 1);
    }

    #[test]
    fn test_invalid_filter_fails_to_build() {
        assert!(FilterChain::build(&[Filter::new(FilterType::Name, "[a-")]).is_err());
        assert!(FilterChain::build(&[Filter::new(FilterType::Resource, "helm")]).is_err());
    }
}
