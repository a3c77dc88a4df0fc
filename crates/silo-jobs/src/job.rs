//! Job snapshot types returned by the registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use silo_model::{Format, RecordKind, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal jobs freeze: counters, errors and completed_at stop
    /// changing once a job is completed or failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Snapshot of an import job as returned to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub resource_type: RecordKind,
    pub file_name: String,
    pub total_records: u64,
    pub valid_records: u64,
    pub error_records: u64,
    pub errors: Vec<ValidationError>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
}

impl ImportJob {
    pub fn new(kind: RecordKind, file_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            resource_type: kind,
            file_name,
            total_records: 0,
            valid_records: 0,
            error_records: 0,
            errors: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            progress: 0,
        }
    }
}

/// Snapshot of an export job.
#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub resource_type: RecordKind,
    pub format: Format,
    pub filters: HashMap<String, String>,
    pub total_records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: u8,
}

impl ExportJob {
    pub fn new(kind: RecordKind, format: Format, filters: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            resource_type: kind,
            format,
            filters,
            total_records: 0,
            download_url: None,
            created_at: Utc::now(),
            completed_at: None,
            progress: 0,
        }
    }
}
