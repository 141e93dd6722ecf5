//! §3 data model: Job, Workflow, Workflow Execution, File.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ops::OperationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    /// `jobs.status` literal values exactly as named in §6.2.
    pub fn as_db_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => JobStatus::Queued,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "cancelled" => JobStatus::Cancelled,
            "error" => JobStatus::Error,
            _ => return None,
        })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Output record written to `jobs.output` once processing succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub filename: String,
    pub video_format: String,
    pub audio_format: String,
    pub audio_bitrate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub uid: Uuid,
    /// URL or empty string; empty means "resolve from the prior step's
    /// output" (DAG chaining).
    pub input: String,
    pub action: Vec<OperationRecord>,
    pub status: JobStatus,
    pub output_version: i32,
    pub output: Option<JobOutput>,
    pub retries: i16,
    pub error: Option<String>,
    pub progress: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub name: String,
    pub search: Option<String>,
    /// Each step is an ordered list of operation records.
    pub steps: Vec<Vec<OperationRecord>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: i64,
    pub workflow_id: i64,
    pub uid: Uuid,
    pub progress: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub bucketname: String,
    pub filetype: Option<String>,
    pub created_at: DateTime<Utc>,
}
