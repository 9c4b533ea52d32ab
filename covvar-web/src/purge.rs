//! Job Purge Service for automatic cleanup of old completed/failed jobs.
//!
//! Runs in the background and periodically removes job directories and
//! uploaded inputs that have exceeded the configured retention period. Jobs
//! that are still pending or running are never touched.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::job::status::read_status;
use crate::utils::fs::io_error;

/// Configuration for job purging.
#[derive(Debug, Clone)]
pub struct PurgeConfig {
    /// Number of days to retain completed/failed jobs.
    /// Set to 0 to retain all jobs indefinitely.
    pub retention_days: u32,

    /// Interval between purge checks in seconds.
    pub check_interval_secs: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            retention_days: crate::config::DEFAULT_JOB_RETENTION_DAYS,
            check_interval_secs: 3600,
        }
    }
}

impl PurgeConfig {
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }
}

/// What a purge pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub jobs: usize,
    pub uploads: usize,
}

/// Removes expired job directories and uploads.
#[derive(Debug, Clone)]
pub struct JobPurgeService {
    config: PurgeConfig,
    jobs_dir: PathBuf,
    upload_dir: PathBuf,
}

impl JobPurgeService {
    pub fn new(config: PurgeConfig, jobs_dir: PathBuf, upload_dir: PathBuf) -> Self {
        Self {
            config,
            jobs_dir,
            upload_dir,
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(
            PurgeConfig::default().with_retention_days(config.job_retention_days),
            config.jobs_dir.clone(),
            config.upload_dir.clone(),
        )
    }

    /// Run a single purge operation against the current time.
    pub async fn run_purge(&self) -> Result<PurgeReport> {
        // 0 = retain forever
        if self.config.retention_days == 0 {
            debug!("Job purging disabled (retention_days = 0)");
            return Ok(PurgeReport::default());
        }

        let cutoff = Local::now() - chrono::Duration::days(i64::from(self.config.retention_days));
        let report = self.purge_before(cutoff).await?;

        if report.jobs > 0 || report.uploads > 0 {
            info!(
                "Purged {} old jobs and {} uploads (retention: {} days)",
                report.jobs, report.uploads, self.config.retention_days
            );
        } else {
            debug!("No jobs to purge");
        }

        Ok(report)
    }

    /// Remove finished jobs last updated before `cutoff`, and uploads last
    /// modified before it.
    pub async fn purge_before(&self, cutoff: DateTime<Local>) -> Result<PurgeReport> {
        Ok(PurgeReport {
            jobs: self.purge_jobs(cutoff).await?,
            uploads: self.purge_uploads(cutoff).await?,
        })
    }

    async fn purge_jobs(&self, cutoff: DateTime<Local>) -> Result<usize> {
        let mut deleted = 0;
        let Some(mut entries) = read_dir_if_exists(&self.jobs_dir).await? else {
            return Ok(0);
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing", &self.jobs_dir, e))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let status = match read_status(&path).await {
                Ok(Some(status)) => status,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping job with unreadable status: {}", e);
                    continue;
                }
            };

            if !status.status.is_terminal() || status.timestamp >= cutoff {
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(job_id = %status.job_id, "Purged job directory");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to purge job"),
            }
        }

        Ok(deleted)
    }

    async fn purge_uploads(&self, cutoff: DateTime<Local>) -> Result<usize> {
        let mut deleted = 0;
        let cutoff: SystemTime = cutoff.into();
        let Some(mut entries) = read_dir_if_exists(&self.upload_dir).await? else {
            return Ok(0);
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing", &self.upload_dir, e))?
        {
            let path = entry.path();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() || meta.modified().map_or(true, |m| m >= cutoff) {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to purge upload"),
            }
        }

        Ok(deleted)
    }

    /// Start the background purge task.
    pub fn start_background_task(&self, cancellation_token: CancellationToken) {
        let service = self.clone();

        tokio::spawn(async move {
            let mut check_interval =
                interval(Duration::from_secs(service.config.check_interval_secs));

            info!(
                "Job purge service started (retention: {} days, interval: {}s)",
                service.config.retention_days, service.config.check_interval_secs
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Job purge service shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        if let Err(e) = service.run_purge().await {
                            error!("Purge cycle failed: {}", e);
                        }
                    }
                }
            }
        });
    }
}

async fn read_dir_if_exists(dir: &Path) -> Result<Option<tokio::fs::ReadDir>> {
    match tokio::fs::read_dir(dir).await {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error("listing", dir, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::status::{JobStatus, StatusTracker};
    use tempfile::TempDir;

    async fn job_with_status(jobs_dir: &Path, id: &str, status: JobStatus) -> PathBuf {
        let dir = jobs_dir.join(id);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        StatusTracker::new(id, &dir)
            .update(status, 0, "", None)
            .await
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_only_finished_expired_jobs_are_removed() {
        let temp_dir = TempDir::new().unwrap();
        let jobs_dir = temp_dir.path().join("jobs");
        let uploads = temp_dir.path().join("uploads");
        tokio::fs::create_dir_all(&uploads).await.unwrap();
        tokio::fs::write(uploads.join("a_input.fasta"), b">a\nM\n")
            .await
            .unwrap();

        let done = job_with_status(&jobs_dir, "done", JobStatus::Completed).await;
        let failed = job_with_status(&jobs_dir, "failed", JobStatus::Failed).await;
        let running = job_with_status(&jobs_dir, "running", JobStatus::Running).await;
        let unknown = jobs_dir.join("unknown");
        tokio::fs::create_dir_all(&unknown).await.unwrap();

        let service = JobPurgeService::new(PurgeConfig::default(), jobs_dir, uploads.clone());
        let report = service
            .purge_before(Local::now() + chrono::Duration::seconds(5))
            .await
            .unwrap();

        assert_eq!(report, PurgeReport { jobs: 2, uploads: 1 });
        assert!(!done.exists());
        assert!(!failed.exists());
        assert!(running.exists());
        assert!(unknown.exists());
    }

    #[tokio::test]
    async fn test_recent_jobs_are_kept() {
        let temp_dir = TempDir::new().unwrap();
        let jobs_dir = temp_dir.path().join("jobs");
        let done = job_with_status(&jobs_dir, "done", JobStatus::Completed).await;

        let service = JobPurgeService::new(
            PurgeConfig::default(),
            jobs_dir,
            temp_dir.path().join("missing-uploads"),
        );
        let report = service.run_purge().await.unwrap();

        assert_eq!(report, PurgeReport::default());
        assert!(done.exists());
    }

    #[tokio::test]
    async fn test_zero_retention_disables_purge() {
        let temp_dir = TempDir::new().unwrap();
        let jobs_dir = temp_dir.path().join("jobs");
        let done = job_with_status(&jobs_dir, "done", JobStatus::Completed).await;

        let service = JobPurgeService::new(
            PurgeConfig::default().with_retention_days(0),
            jobs_dir,
            temp_dir.path().to_path_buf(),
        );
        assert_eq!(service.run_purge().await.unwrap(), PurgeReport::default());
        assert!(done.exists());
    }
}
