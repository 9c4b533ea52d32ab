//! Persisted job status.
//!
//! Each job directory holds a single `status.json` that is replaced whole on
//! every update. Only the background task running the job writes it; any
//! number of pollers may read it concurrently.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::Result;
use crate::utils::fs;

/// File name of the status record inside a job directory.
pub const STATUS_FILE_NAME: &str = "status.json";

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known state of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    /// 0-100.
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Local>,
    pub error: Option<String>,
}

/// Writes the status record of one job.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    job_id: String,
    path: PathBuf,
    events: Option<broadcast::Sender<StatusRecord>>,
}

impl StatusTracker {
    pub fn new(job_id: impl Into<String>, job_dir: &Path) -> Self {
        Self {
            job_id: job_id.into(),
            path: job_dir.join(STATUS_FILE_NAME),
            events: None,
        }
    }

    /// Also publish every persisted record on `events`.
    pub fn with_events(mut self, events: broadcast::Sender<StatusRecord>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the persisted record with the given state and a fresh timestamp.
    pub async fn update(
        &self,
        status: JobStatus,
        progress: u8,
        message: impl Into<String>,
        error: Option<String>,
    ) -> Result<StatusRecord> {
        let record = StatusRecord {
            job_id: self.job_id.clone(),
            status,
            progress: progress.min(100),
            message: message.into(),
            timestamp: Local::now(),
            error,
        };

        fs::write_json_atomic(&self.path, &record).await?;

        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.send(record.clone());
        }

        debug!(
            job_id = %record.job_id,
            status = %record.status,
            progress = record.progress,
            message = %record.message,
            "Job status updated"
        );

        Ok(record)
    }
}

/// Read the status record of the job stored in `job_dir`.
///
/// Returns `Ok(None)` when the job has no status file; a malformed file is an
/// error.
pub async fn read_status(job_dir: &Path) -> Result<Option<StatusRecord>> {
    fs::read_json_if_exists_async(&job_dir.join(STATUS_FILE_NAME)).await
}

/// Blocking variant of [`read_status`].
pub fn read_status_sync(job_dir: &Path) -> Result<Option<StatusRecord>> {
    fs::read_json_if_exists(&job_dir.join(STATUS_FILE_NAME))
}
