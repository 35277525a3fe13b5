//! Execution and task views, statuses and status aggregation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ReplicationError;

/// Free-form attributes attached to executions and tasks
pub type ExtraAttrs = serde_json::Map<String, serde_json::Value>;

pub const VENDOR_TYPE_REPLICATION: &str = "REPLICATION";
pub const VENDOR_TYPE_GARBAGE_COLLECTION: &str = "GARBAGE_COLLECTION";
pub const VENDOR_TYPE_RETENTION: &str = "RETENTION";
pub const VENDOR_TYPE_SCAN: &str = "SCAN";
pub const VENDOR_TYPE_SCAN_ALL: &str = "SCAN_ALL";
pub const VENDOR_TYPE_SCHEDULER: &str = "SCHEDULER";

pub const TRIGGER_MANUAL: &str = "MANUAL";
pub const TRIGGER_SCHEDULE: &str = "SCHEDULE";
pub const TRIGGER_EVENT: &str = "EVENT";

/// Lifecycle status shared by executions and tasks.
///
/// `ERROR` and `SUCCESS` are accepted as aliases of `FAILED` and `SUCCEEDED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Scheduled,
    Running,
    Stopped,
    #[serde(alias = "ERROR")]
    Failed,
    #[serde(alias = "SUCCESS")]
    Succeeded,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Pending,
        Status::Scheduled,
        Status::Running,
        Status::Stopped,
        Status::Failed,
        Status::Succeeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Scheduled => "SCHEDULED",
            Status::Running => "RUNNING",
            Status::Stopped => "STOPPED",
            Status::Failed => "FAILED",
            Status::Succeeded => "SUCCEEDED",
        }
    }

    /// Progress code: a status never moves to a lower code within one run
    pub fn code(&self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Scheduled => 1,
            Status::Running => 2,
            Status::Stopped | Status::Failed | Status::Succeeded => 3,
        }
    }

    pub fn is_final(&self) -> bool {
        self.code() == 3
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Status::Pending),
            "SCHEDULED" => Ok(Status::Scheduled),
            "RUNNING" => Ok(Status::Running),
            "STOPPED" => Ok(Status::Stopped),
            "FAILED" | "ERROR" => Ok(Status::Failed),
            "SUCCEEDED" | "SUCCESS" => Ok(Status::Succeeded),
            other => Err(ReplicationError::Validation(format!("unknown status: {}", other))),
        }
    }
}

/// Derives an execution status from the statuses of its tasks.
///
/// Precedence: any running task keeps the execution running, then any
/// pending or scheduled task keeps it pending. Once every task is final the
/// execution succeeded only if all tasks did, failed if any task failed, and is
/// stopped otherwise. Returns `None` when there are no tasks.
pub fn aggregate_status(counts: &BTreeMap<Status, i64>) -> Option<Status> {
    let count = |status: Status| counts.get(&status).copied().unwrap_or(0);
    let total: i64 = counts.values().sum();
    if total == 0 {
        return None;
    }
    let status = if count(Status::Running) > 0 {
        Status::Running
    } else if count(Status::Pending) + count(Status::Scheduled) > 0 {
        Status::Pending
    } else if count(Status::Succeeded) == total {
        Status::Succeeded
    } else if count(Status::Failed) > 0 {
        Status::Failed
    } else {
        Status::Stopped
    };
    Some(status)
}

/// Task count per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub task_count: i64,
    pub succeeded_task_count: i64,
    pub failed_task_count: i64,
    pub pending_task_count: i64,
    pub running_task_count: i64,
    pub scheduled_task_count: i64,
    pub stopped_task_count: i64,
}

impl Metrics {
    pub fn from_counts(counts: &BTreeMap<Status, i64>) -> Self {
        let count = |status: Status| counts.get(&status).copied().unwrap_or(0);
        Self {
            task_count: counts.values().sum(),
            succeeded_task_count: count(Status::Succeeded),
            failed_task_count: count(Status::Failed),
            pending_task_count: count(Status::Pending),
            running_task_count: count(Status::Running),
            scheduled_task_count: count(Status::Scheduled),
            stopped_task_count: count(Status::Stopped),
        }
    }
}

/// One run of a vendor action (a replication policy, a GC, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub vendor_type: String,
    pub vendor_id: i64,
    pub status: Status,
    /// Explains the status when it wasn't derived from tasks
    pub status_message: String,
    pub metrics: Option<Metrics>,
    pub trigger: String,
    pub extra_attrs: ExtraAttrs,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// The unit of work submitted to the job system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub execution_id: i64,
    pub job_id: Option<String>,
    pub status: Status,
    pub status_code: i32,
    pub status_revision: i64,
    pub status_message: String,
    pub retry_count: i32,
    pub extra_attrs: ExtraAttrs,
    pub start_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}
