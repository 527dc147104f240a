use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use waybill_common::types::SyncSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One entry in a job's ordered error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub source: String,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

impl JobError {
    pub fn new(source: SyncSource, error: impl Into<String>) -> Self {
        Self {
            source: source.as_str().to_owned(),
            error: error.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// A user-initiated replay of a historical date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillJob {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: JobStatus,
    pub orders_total: i32,
    pub orders_imported: i32,
    pub orders_failed: i32,
    pub shipping_total: i32,
    pub shipping_imported: i32,
    pub shipping_failed: i32,
    pub tasks_total: i32,
    pub tasks_completed: i32,
    pub tasks_failed: i32,
    pub error_log: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Terminal report for one fetch task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub total: i32,
    pub imported: i32,
    pub failed: i32,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(total: i32, imported: i32, failed: i32) -> Self {
        Self {
            total,
            imported,
            failed,
            error: None,
        }
    }

    pub fn errored(error: impl Into<String>) -> Self {
        Self {
            total: 0,
            imported: 0,
            failed: 0,
            error: Some(error.into()),
        }
    }
}
