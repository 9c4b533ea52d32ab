//! Job execution.
//!
//! [`JobRunner::submit`] records the job as pending and hands it to its own
//! tokio task. The task drives the pipeline, reconciles results and always
//! leaves a terminal status behind, even when something in between errors or
//! panics.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use super::invoker::{CommandRunner, PipelineInvoker, PipelineOutcome, ProcessRunner};
use super::model::Job;
use super::reconciler::ResultReconciler;
use super::status::{JobStatus, StatusRecord, StatusTracker};
use crate::Result;
use crate::config::AppConfig;
use crate::utils::fs;

/// Handle to a submitted job.
///
/// Dropping it detaches the job; it keeps running in the background.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    pub job_dir: PathBuf,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Wait for the background task to finish.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!(job_id = %self.job_id, "Job task ended abnormally: {}", e);
        }
    }
}

struct RunnerInner {
    invoker: PipelineInvoker,
    reconciler: ResultReconciler,
    /// Status updates of every job started by this runner.
    event_tx: broadcast::Sender<StatusRecord>,
}

/// Runs jobs end to end, one background task per job.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

impl JobRunner {
    pub fn new(invoker: PipelineInvoker, reconciler: ResultReconciler) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(RunnerInner {
                invoker,
                reconciler,
                event_tx,
            }),
        }
    }

    /// Subscribe to status updates of jobs submitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusRecord> {
        self.inner.event_tx.subscribe()
    }

    /// Runner that launches the configured tool with `runner`.
    pub fn with_command_runner(config: &AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            PipelineInvoker::new(config.tool.clone(), runner),
            ResultReconciler::new(),
        )
    }

    /// Runner that launches the configured tool as a child process.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_command_runner(config, Arc::new(ProcessRunner))
    }

    /// Record `job` as pending and start it in the background.
    ///
    /// Returns once the pending status is on disk, so the job is immediately
    /// visible to status readers.
    pub async fn submit(&self, job: Job) -> Result<JobHandle> {
        fs::ensure_dir_all_with_op("creating job directory", &job.output_dir).await?;

        let tracker = StatusTracker::new(&job.id, &job.output_dir)
            .with_events(self.inner.event_tx.clone());
        tracker
            .update(JobStatus::Pending, 0, "Job queued", None)
            .await?;

        info!(
            job_id = %job.id,
            phases = %job.phases,
            input = %job.input_file.display(),
            "Job submitted"
        );

        let job_id = job.id.clone();
        let job_dir = job.output_dir.clone();
        let inner = self.inner.clone();

        let task = tokio::spawn(async move {
            let span = info_span!("job", job_id = %job.id);
            let work_tracker = tracker.clone();
            let work = tokio::spawn(
                async move {
                    inner.execute(&job, &work_tracker).await;
                }
                .instrument(span),
            );

            if let Err(e) = work.await {
                error!(job_id = %tracker.job_id(), "Job task panicked: {}", e);
                record_failure(&tracker, "Prediction failed", format!("Internal error: {e}"))
                    .await;
            }
        });

        Ok(JobHandle {
            job_id,
            job_dir,
            task,
        })
    }
}

impl RunnerInner {
    async fn execute(&self, job: &Job, tracker: &StatusTracker) {
        if let Err(e) = self.run(job, tracker).await {
            error!(job_id = %job.id, "Job failed: {}", e);
            record_failure(tracker, "Prediction failed", e.to_string()).await;
        }
    }

    async fn run(&self, job: &Job, tracker: &StatusTracker) -> Result<()> {
        tracker
            .update(JobStatus::Running, 10, "Starting prediction...", None)
            .await?;

        match self.invoker.run(job, tracker).await? {
            PipelineOutcome::Succeeded => {
                tracker
                    .update(JobStatus::Running, 80, "Processing results...", None)
                    .await?;

                self.reconciler.reconcile(job).await?;

                tracker
                    .update(
                        JobStatus::Completed,
                        100,
                        "Prediction completed successfully",
                        None,
                    )
                    .await?;
                info!(job_id = %job.id, "Job completed");
            }
            PipelineOutcome::Failed(failure) => {
                warn!(
                    job_id = %job.id,
                    message = %failure.message,
                    "Pipeline failed"
                );
                tracker
                    .update(JobStatus::Failed, 0, failure.message, Some(failure.detail))
                    .await?;
            }
        }

        Ok(())
    }
}

async fn record_failure(tracker: &StatusTracker, message: &str, detail: String) {
    if let Err(e) = tracker
        .update(JobStatus::Failed, 0, message, Some(detail))
        .await
    {
        error!(
            path = %tracker.path().display(),
            "Failed to record job failure: {}", e
        );
    }
}
