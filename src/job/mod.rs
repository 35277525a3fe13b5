//! The job-dispatch boundary
//!
//! Tasks are executed as opaque jobs by a job system. The engine only submits
//! jobs, stops them and reads their logs through [`JobSubmitter`]; status
//! changes come back through [`crate::task::HookHandler`].

pub mod local;
pub mod replication;

use crate::error::Result;
use crate::task::Status;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub use local::LocalJobSubmitter;
pub use replication::ReplicationJob;

/// Name of the job that replicates one resource
pub const JOB_NAME_REPLICATION: &str = "REPLICATION";

pub const PARAM_SRC_RESOURCE: &str = "src_resource";
pub const PARAM_DST_RESOURCE: &str = "dst_resource";

pub type Parameters = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    Generic,
    Periodic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub kind: JobKind,
    #[serde(default)]
    pub is_unique: bool,
    /// Only for periodic jobs
    #[serde(default)]
    pub cron: Option<String>,
}

impl JobMetadata {
    pub fn generic() -> Self {
        Self {
            kind: JobKind::Generic,
            is_unique: false,
            cron: None,
        }
    }
}

/// A job request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub parameters: Parameters,
    pub metadata: JobMetadata,
}

/// A status report from the job system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: Status,
    /// Increases with every report for the same task
    pub revision: i64,
    /// Mid-flight progress data, routed to a check-in processor
    #[serde(default)]
    pub check_in: Option<String>,
    /// Why the job ended up in this status, e.g. the error of a failed job
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusChange {
    pub fn new(status: Status, revision: i64) -> Self {
        Self {
            status,
            revision,
            check_in: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn check_in(status: Status, data: impl Into<String>) -> Self {
        Self {
            status,
            revision: 0,
            check_in: Some(data.into()),
            message: None,
        }
    }

    pub fn has_check_in(&self) -> bool {
        self.check_in.as_deref().is_some_and(|data| !data.is_empty())
    }
}

/// Submission side of the job system
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Submits `job` for task `task_id` and returns the job id
    async fn submit(&self, task_id: i64, job: &Job) -> Result<String>;

    /// Asks the job to stop; returns once the request is delivered
    async fn stop(&self, job_id: &str) -> Result<()>;

    async fn get_log(&self, job_id: &str) -> Result<Vec<u8>>;
}

/// Cooperative cancellation check handed to running jobs
pub type StopChecker = Arc<dyn Fn() -> bool + Send + Sync>;

/// Log lines of one job, mirrored to `tracing`
#[derive(Debug, Clone, Default)]
pub struct JobLogger {
    job_id: String,
    lines: Arc<Mutex<Vec<String>>>,
}

impl JobLogger {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            lines: Arc::default(),
        }
    }

    fn push(&self, level: &str, message: &str) {
        let line = format!(
            "{} [{}] {}",
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            level,
            message
        );
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    pub fn info(&self, message: &str) {
        tracing::info!(job_id = %self.job_id, "{}", message);
        self.push("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(job_id = %self.job_id, "{}", message);
        self.push("WARNING", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(job_id = %self.job_id, "{}", message);
        self.push("ERROR", message);
    }

    /// Captured lines, newline separated
    pub fn contents(&self) -> Vec<u8> {
        self.lines
            .lock()
            .map(|lines| {
                let mut text = lines.join("\n");
                if !text.is_empty() {
                    text.push('\n');
                }
                text.into_bytes()
            })
            .unwrap_or_default()
    }
}
