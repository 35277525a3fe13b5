//! Runs the parsed command

use crate::adapter::HealthStatus;
use crate::adapter::native::NativeAdapter;
use crate::cli::args::{Args, Command};
use crate::common::{Timer, pluralize};
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::filter::filter_resources;
use crate::flow::NO_RESOURCES_MESSAGE;
use crate::flow::deletion::deletion_operation;
use crate::flow::stage::{assemble_destination, assemble_source, resolve_registries};
use crate::logging::{Console, format_duration};
use crate::model::{Policy, Registry, Resource};
use crate::pattern::Pattern;
use serde::de::DeserializeOwned;
use std::path::Path;

pub struct Runner {
    args: Args,
    config: ReplicationConfig,
    console: Console,
}

/// One task `plan` would create
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub operation: &'static str,
    pub source: String,
    pub destination: String,
}

impl Runner {
    pub fn new(args: Args, config: ReplicationConfig) -> Self {
        let console = if args.quiet {
            Console::new_quiet()
        } else {
            Console::new(args.verbose)
        };
        Self {
            args,
            config,
            console,
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.args.validate().map_err(ReplicationError::Validation)?;
        let timer = Timer::start("command");
        match &self.args.command {
            Command::Match {
                pattern,
                candidates,
            } => self.run_match(pattern, candidates)?,
            Command::CheckPolicy { policy } => self.run_check_policy(policy)?,
            Command::Plan { policy, resources } => self.run_plan(policy, resources)?,
            Command::Health { registry } => self.run_health(registry).await?,
        }
        timer.log_elapsed();
        self.console
            .detail(&format!("finished in {}", format_duration(timer.elapsed())));
        Ok(())
    }

    fn run_match(&self, pattern: &str, candidates: &[String]) -> Result<()> {
        let pattern = Pattern::new(pattern)?;
        for candidate in candidates {
            println!("{}: {}", candidate, pattern.matches(candidate));
        }
        Ok(())
    }

    fn run_check_policy(&self, path: &str) -> Result<()> {
        let policy: Policy = read_json(path)?;
        policy.validate()?;
        self.console.success(&format!("policy {:?} is valid", policy.name));
        self.console.summary_kv(
            "Policy",
            &[
                ("source", side(&policy.src_registry)),
                ("destination", side(&policy.dest_registry)),
                ("filters", pluralize(policy.filters.len(), "filter")),
                ("replicate deletion", policy.replicate_deletion.to_string()),
                ("override", policy.override_existing.to_string()),
            ],
        );
        Ok(())
    }

    fn run_plan(&self, policy_path: &str, resources_path: &str) -> Result<()> {
        let policy: Policy = read_json(policy_path)?;
        policy.validate()?;
        let resources: Vec<Resource> = read_json(resources_path)?;
        let local = Registry::local(self.config.local_registry_url.as_str());

        let planned = plan(&policy, resources, &local)?;
        if planned.is_empty() {
            self.console.info(NO_RESOURCES_MESSAGE);
            return Ok(());
        }
        let lines: Vec<String> = planned
            .iter()
            .map(|task| format!("{} -> {} ({})", task.source, task.destination, task.operation))
            .collect();
        self.console.list(&pluralize(planned.len(), "task"), &lines);
        Ok(())
    }

    async fn run_health(&self, path: &str) -> Result<()> {
        let registry: Registry = read_json(path)?;
        let adapter = NativeAdapter::builder(registry.clone())
            .with_timeout(self.config.http_timeout())
            .build()?;
        match crate::adapter::Adapter::health_check(&adapter).await? {
            HealthStatus::Healthy => {
                self.console.success(&format!("{} is healthy", registry.url))
            }
            HealthStatus::Unhealthy => {
                self.console.warning(&format!("{} is unhealthy", registry.url))
            }
        }
        Ok(())
    }
}

/// The tasks a policy would create for `resources` on its first run
pub fn plan(
    policy: &Policy,
    resources: Vec<Resource>,
    local: &Registry,
) -> Result<Vec<PlannedTask>> {
    let policy = resolve_registries(policy, local);
    let src = assemble_source(filter_resources(resources, &policy.filters)?, &policy);
    let dst = assemble_destination(&src, &policy);
    Ok(src
        .iter()
        .zip(&dst)
        .map(|(src, dst)| PlannedTask {
            operation: if dst.deleted {
                deletion_operation(dst)
            } else {
                "copy"
            },
            source: src.display_name(),
            destination: dst.display_name(),
        })
        .collect())
}

fn side(registry: &Option<Registry>) -> String {
    match registry {
        Some(registry) if registry.id != crate::model::LOCAL_REGISTRY_ID => {
            format!("{} ({})", registry.url, registry.registry_type)
        }
        _ => "local".to_string(),
    }
}

fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        ReplicationError::Validation(format!("failed to read {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&content)?)
}
