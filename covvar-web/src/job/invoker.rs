//! External pipeline invocation.
//!
//! Translates a job's phase selection into one or more runs of the external
//! classification tool and turns each run's exit into an outcome. A combined
//! run covers every phase in one process; otherwise the selected phases run
//! one process at a time, in ascending order, stopping at the first failure.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{BoundedOutput, output_with_timeout, tail_lossy, tokio_command};
use tracing::{debug, info, warn};

use super::model::{Job, PhaseSelection, Thresholds};
use super::status::{JobStatus, StatusTracker};
use crate::config::ToolConfig;
use crate::{Error, Result};

/// One run of the external tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment for the child.
    pub envs: Vec<(String, OsString)>,
    pub timeout: Duration,
    /// Phase covered by this run; `None` for a combined run.
    pub phase: Option<u8>,
}

impl ToolCommand {
    /// Human-readable command line.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// How a single tool run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    TimedOut,
}

/// Executes tool commands.
///
/// An `Err` means the run could not be carried out at all (e.g. spawn
/// failure); a tool that ran and failed is `Ok(ToolOutcome::Failed)`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutcome>;
}

/// Most stderr kept from a failed run; earlier output is dropped.
pub const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Runs tool commands as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutcome> {
        let mut cmd = tokio_command(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.envs {
            cmd.env(key, value);
        }

        info!(phase = ?command.phase, "Executing: {}", command.command_line());

        let output = output_with_timeout(&mut cmd, command.timeout)
            .await
            .map_err(|e| {
                Error::Other(format!(
                    "Failed to spawn {}: {}",
                    command.program.display(),
                    e
                ))
            })?;

        match output {
            BoundedOutput::Exited(output) => {
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    debug!("stdout: {}", line);
                }
                let stderr = tail_lossy(&output.stderr, MAX_STDERR_BYTES).trim().to_string();

                if output.status.success() {
                    if !stderr.is_empty() {
                        debug!("stderr: {}", stderr);
                    }
                    Ok(ToolOutcome::Success)
                } else {
                    warn!(
                        phase = ?command.phase,
                        exit_code = ?output.status.code(),
                        "Tool exited with failure"
                    );
                    Ok(ToolOutcome::Failed {
                        exit_code: output.status.code(),
                        stderr,
                    })
                }
            }
            BoundedOutput::TimedOut { elapsed } => {
                warn!(
                    phase = ?command.phase,
                    elapsed_secs = elapsed.as_secs(),
                    "Tool killed after exceeding its time limit"
                );
                Ok(ToolOutcome::TimedOut)
            }
        }
    }
}

/// How the tool is driven for a given selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// One run over every phase.
    Combined,
    /// One run per listed phase, ascending.
    PerPhase(Vec<u8>),
}

impl RunMode {
    pub fn for_selection(selection: &PhaseSelection) -> Self {
        if selection.is_combined() {
            Self::Combined
        } else {
            Self::PerPhase(selection.effective_phases())
        }
    }
}

/// Why a pipeline run failed; becomes the terminal status message and error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub message: String,
    pub detail: String,
}

/// Result of driving the tool for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Succeeded,
    Failed(PipelineFailure),
}

/// Progress reported before per-phase run `index` (zero-based) of `total`.
pub fn phase_progress(index: usize, total: usize) -> u8 {
    let step = (index * 50) / total.max(1);
    30 + step.min(50) as u8
}

/// Drives the external tool for one job.
pub struct PipelineInvoker {
    tool: ToolConfig,
    runner: Arc<dyn CommandRunner>,
}

impl PipelineInvoker {
    pub fn new(tool: ToolConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { tool, runner }
    }

    fn envs(&self) -> Vec<(String, OsString)> {
        let Some(code_path) = &self.tool.code_path else {
            return Vec::new();
        };

        let mut paths = vec![code_path.clone()];
        if let Some(existing) = std::env::var_os("PYTHONPATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        let value = std::env::join_paths(paths).unwrap_or_else(|_| code_path.clone().into());
        vec![("PYTHONPATH".to_string(), value)]
    }

    fn base_args(&self, job: &Job) -> Vec<String> {
        let mut args = self.tool.program_args.clone();
        args.push("-f".to_string());
        args.push(job.input_file.display().to_string());
        args.push("-o".to_string());
        args.push(job.output_dir.display().to_string());
        if job.options.verbose {
            args.push("--verbose".to_string());
        }
        args
    }

    /// Command for a combined run.
    pub fn combined_command(&self, job: &Job) -> ToolCommand {
        let mut args = self.base_args(job);
        args.push("--all-phases".to_string());
        args.push("--thresholds".to_string());
        args.extend(Thresholds::DEFAULT.to_args());

        ToolCommand {
            program: self.tool.program.clone(),
            args,
            envs: self.envs(),
            timeout: self.tool.combined_timeout,
            phase: None,
        }
    }

    /// Command for a single-phase run.
    pub fn phase_command(&self, job: &Job, phase: u8) -> ToolCommand {
        let mut args = self.base_args(job);
        args.push("-p".to_string());
        args.push(phase.to_string());
        args.push("--thresholds".to_string());
        args.extend(job.thresholds_for(phase).to_args());

        ToolCommand {
            program: self.tool.program.clone(),
            args,
            envs: self.envs(),
            timeout: self.tool.phase_timeout,
            phase: Some(phase),
        }
    }

    /// Run the tool for `job`, reporting progress through `tracker`.
    ///
    /// Terminal statuses are left to the caller: a failed run is returned as
    /// [`PipelineOutcome::Failed`], and `Err` covers orchestration faults.
    pub async fn run(&self, job: &Job, tracker: &StatusTracker) -> Result<PipelineOutcome> {
        match RunMode::for_selection(&job.phases) {
            RunMode::Combined => self.run_combined(job, tracker).await,
            RunMode::PerPhase(phases) => self.run_per_phase(job, &phases, tracker).await,
        }
    }

    async fn run_combined(&self, job: &Job, tracker: &StatusTracker) -> Result<PipelineOutcome> {
        let command = self.combined_command(job);

        tracker
            .update(
                JobStatus::Running,
                30,
                format!("Running all phases: {}", command.command_line()),
                None,
            )
            .await?;

        let outcome = match self.runner.run(&command).await? {
            ToolOutcome::Success => PipelineOutcome::Succeeded,
            ToolOutcome::Failed { stderr, .. } => PipelineOutcome::Failed(PipelineFailure {
                message: "Prediction failed".to_string(),
                detail: non_empty_or(stderr, "Unknown error occurred"),
            }),
            ToolOutcome::TimedOut => PipelineOutcome::Failed(timed_out(&command)),
        };
        Ok(outcome)
    }

    async fn run_per_phase(
        &self,
        job: &Job,
        phases: &[u8],
        tracker: &StatusTracker,
    ) -> Result<PipelineOutcome> {
        let total = phases.len();

        for (index, &phase) in phases.iter().enumerate() {
            let command = self.phase_command(job, phase);

            tracker
                .update(
                    JobStatus::Running,
                    phase_progress(index, total),
                    format!("Running phase {phase}..."),
                    None,
                )
                .await?;

            match self.runner.run(&command).await? {
                ToolOutcome::Success => {
                    debug!(job_id = %job.id, phase, "Phase finished");
                }
                ToolOutcome::Failed { stderr, .. } => {
                    return Ok(PipelineOutcome::Failed(PipelineFailure {
                        message: format!("Phase {phase} failed"),
                        detail: non_empty_or(stderr, &format!("Phase {phase} failed")),
                    }));
                }
                ToolOutcome::TimedOut => {
                    return Ok(PipelineOutcome::Failed(timed_out(&command)));
                }
            }
        }

        Ok(PipelineOutcome::Succeeded)
    }
}

fn non_empty_or(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

fn timed_out(command: &ToolCommand) -> PipelineFailure {
    let scope = match command.phase {
        Some(phase) => format!("Phase {phase}"),
        None => "Job".to_string(),
    };
    PipelineFailure {
        message: "Prediction timed out".to_string(),
        detail: format!(
            "{scope} exceeded maximum execution time ({}s)",
            command.timeout.as_secs()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::JobOptions;
    use crate::job::status::read_status_sync;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records each command with the progress visible when it started.
    #[derive(Default)]
    struct RecordingRunner {
        outcomes: HashMap<Option<u8>, ToolOutcome>,
        calls: Mutex<Vec<(ToolCommand, u8)>>,
    }

    impl RecordingRunner {
        fn with_outcome(mut self, phase: Option<u8>, outcome: ToolOutcome) -> Self {
            self.outcomes.insert(phase, outcome);
            self
        }

        fn calls(&self) -> Vec<(ToolCommand, u8)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &ToolCommand) -> Result<ToolOutcome> {
            let out_flag = command.args.iter().position(|a| a == "-o").unwrap();
            let job_dir = Path::new(command.args[out_flag + 1].as_str());
            let progress = read_status_sync(job_dir).unwrap().unwrap().progress;
            self.calls.lock().unwrap().push((command.clone(), progress));
            Ok(self
                .outcomes
                .get(&command.phase)
                .cloned()
                .unwrap_or(ToolOutcome::Success))
        }
    }

    fn tool_config() -> ToolConfig {
        ToolConfig {
            program: PathBuf::from("python3"),
            program_args: vec!["-m".to_string(), "deepcovvar".to_string()],
            code_path: None,
            combined_timeout: Duration::from_secs(3600),
            phase_timeout: Duration::from_secs(1800),
        }
    }

    fn job(dir: &Path, phases: PhaseSelection, options: JobOptions) -> Job {
        Job::new("job-1", dir.join("seqs.fasta"), phases, options, dir)
    }

    #[test]
    fn test_phase_progress() {
        assert_eq!(phase_progress(0, 1), 30);
        assert_eq!(phase_progress(0, 3), 30);
        assert_eq!(phase_progress(1, 3), 46);
        assert_eq!(phase_progress(2, 3), 63);
        assert_eq!(phase_progress(3, 4), 67);
    }

    #[test]
    fn test_run_mode_selection() {
        assert_eq!(RunMode::for_selection(&PhaseSelection::All), RunMode::Combined);
        assert_eq!(
            RunMode::for_selection(&PhaseSelection::explicit(1..=5).unwrap()),
            RunMode::Combined
        );
        assert_eq!(
            RunMode::for_selection(&PhaseSelection::explicit([4, 2]).unwrap()),
            RunMode::PerPhase(vec![2, 4])
        );
    }

    #[test]
    fn test_combined_command_line() {
        let invoker = PipelineInvoker::new(tool_config(), Arc::new(ProcessRunner));
        let options = JobOptions {
            verbose: true,
            ..Default::default()
        };
        let job = job(Path::new("/jobs/j1"), PhaseSelection::All, options);

        let command = invoker.combined_command(&job);
        assert_eq!(
            command.args,
            vec![
                "-m", "deepcovvar", "-f", "/jobs/j1/seqs.fasta", "-o", "/jobs/j1", "--verbose",
                "--all-phases", "--thresholds", "50", "50"
            ]
        );
        assert_eq!(command.timeout, Duration::from_secs(3600));
        assert_eq!(command.phase, None);
        assert!(command.envs.is_empty());
    }

    #[test]
    fn test_phase_command_uses_custom_thresholds() {
        let invoker = PipelineInvoker::new(tool_config(), Arc::new(ProcessRunner));
        let mut options = JobOptions::default();
        options.thresholds.insert(1, Thresholds::new(60.0, 40.0));
        let job = job(
            Path::new("/jobs/j1"),
            PhaseSelection::explicit([1]).unwrap(),
            options,
        );

        let command = invoker.phase_command(&job, 1);
        assert_eq!(
            &command.args[command.args.len() - 5..],
            &["-p", "1", "--thresholds", "60", "40"]
        );
        assert_eq!(command.timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_code_path_is_exported() {
        let mut config = tool_config();
        config.code_path = Some(PathBuf::from("/opt/classifier"));
        let invoker = PipelineInvoker::new(config, Arc::new(ProcessRunner));
        let job = job(Path::new("/jobs/j1"), PhaseSelection::All, JobOptions::default());

        let command = invoker.combined_command(&job);
        let (key, value) = &command.envs[0];
        assert_eq!(key, "PYTHONPATH");
        assert!(value.to_string_lossy().starts_with("/opt/classifier"));
    }

    #[tokio::test]
    async fn test_combined_mode_single_invocation() {
        let temp_dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let invoker = PipelineInvoker::new(tool_config(), runner.clone());
        let tracker = StatusTracker::new("job-1", temp_dir.path());
        let job = job(
            temp_dir.path(),
            PhaseSelection::explicit([5, 4, 3, 2, 1]).unwrap(),
            JobOptions::default(),
        );

        let outcome = invoker.run(&job, &tracker).await.unwrap();

        assert_eq!(outcome, PipelineOutcome::Succeeded);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.args.contains(&"--all-phases".to_string()));
        assert_eq!(calls[0].1, 30);
    }

    #[tokio::test]
    async fn test_per_phase_runs_sorted_with_progress() {
        let temp_dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let invoker = PipelineInvoker::new(tool_config(), runner.clone());
        let tracker = StatusTracker::new("job-1", temp_dir.path());
        let job = job(
            temp_dir.path(),
            PhaseSelection::explicit([3, 1, 2]).unwrap(),
            JobOptions::default(),
        );

        let outcome = invoker.run(&job, &tracker).await.unwrap();

        assert_eq!(outcome, PipelineOutcome::Succeeded);
        let calls = runner.calls();
        let phases: Vec<Option<u8>> = calls.iter().map(|(c, _)| c.phase).collect();
        let progress: Vec<u8> = calls.iter().map(|(_, p)| *p).collect();
        assert_eq!(phases, vec![Some(1), Some(2), Some(3)]);
        assert_eq!(progress, vec![30, 46, 63]);
    }

    #[tokio::test]
    async fn test_per_phase_fail_fast() {
        let temp_dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default().with_outcome(
            Some(2),
            ToolOutcome::Failed {
                exit_code: Some(1),
                stderr: "model weights missing".to_string(),
            },
        ));
        let invoker = PipelineInvoker::new(tool_config(), runner.clone());
        let tracker = StatusTracker::new("job-1", temp_dir.path());
        let job = job(
            temp_dir.path(),
            PhaseSelection::explicit([1, 2, 3, 4]).unwrap(),
            JobOptions::default(),
        );

        let outcome = invoker.run(&job, &tracker).await.unwrap();

        assert_eq!(
            outcome,
            PipelineOutcome::Failed(PipelineFailure {
                message: "Phase 2 failed".to_string(),
                detail: "model weights missing".to_string(),
            })
        );
        let phases: Vec<Option<u8>> = runner.calls().iter().map(|(c, _)| c.phase).collect();
        assert_eq!(phases, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_empty_stderr_falls_back_to_generic_message() {
        let temp_dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default().with_outcome(
            None,
            ToolOutcome::Failed {
                exit_code: Some(2),
                stderr: "  ".to_string(),
            },
        ));
        let invoker = PipelineInvoker::new(tool_config(), runner);
        let tracker = StatusTracker::new("job-1", temp_dir.path());
        let job = job(temp_dir.path(), PhaseSelection::All, JobOptions::default());

        let outcome = invoker.run(&job, &tracker).await.unwrap();
        let PipelineOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.message, "Prediction failed");
        assert_eq!(failure.detail, "Unknown error occurred");
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_exit_failure() {
        let temp_dir = TempDir::new().unwrap();
        let runner =
            Arc::new(RecordingRunner::default().with_outcome(Some(4), ToolOutcome::TimedOut));
        let invoker = PipelineInvoker::new(tool_config(), runner.clone());
        let tracker = StatusTracker::new("job-1", temp_dir.path());
        let job = job(
            temp_dir.path(),
            PhaseSelection::explicit([4, 5]).unwrap(),
            JobOptions::default(),
        );

        let outcome = invoker.run(&job, &tracker).await.unwrap();
        let PipelineOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.message, "Prediction timed out");
        assert!(failure.detail.contains("Phase 4"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_reports_exit_and_timeout() {
        let command = |script: &str, timeout: Duration| ToolCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            envs: vec![("PYTHONPATH".to_string(), OsString::from("/opt/x"))],
            timeout,
            phase: Some(1),
        };

        let ok = ProcessRunner
            .run(&command("test \"$PYTHONPATH\" = /opt/x", Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(ok, ToolOutcome::Success);

        let failed = ProcessRunner
            .run(&command("echo bad input >&2; exit 4", Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(
            failed,
            ToolOutcome::Failed {
                exit_code: Some(4),
                stderr: "bad input".to_string(),
            }
        );

        let timed_out = ProcessRunner
            .run(&command("sleep 5", Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(timed_out, ToolOutcome::TimedOut);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_keeps_only_stderr_tail() {
        // About 82 KB of stderr, ending in a recognizable line.
        let script = "i=0; while [ $i -lt 2000 ]; do \
            echo 0123456789012345678901234567890123456789 >&2; i=$((i+1)); done; \
            echo last line >&2; exit 1";
        let command = ToolCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            envs: Vec::new(),
            timeout: Duration::from_secs(30),
            phase: Some(2),
        };

        match ProcessRunner.run(&command).await.unwrap() {
            ToolOutcome::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(1));
                assert!(stderr.len() <= MAX_STDERR_BYTES);
                assert!(stderr.len() > MAX_STDERR_BYTES - 100);
                assert!(stderr.ends_with("last line"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
