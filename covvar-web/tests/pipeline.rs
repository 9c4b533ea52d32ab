//! End-to-end job tests.
//!
//! A scripted tool stands in for the classifier: it reads the input FASTA,
//! writes one results row per sequence for every phase it is asked to run,
//! and records the status each run observed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use covvar_web::config::AppConfig;
use covvar_web::job::{
    CommandRunner, JobRunner, JobStatus, ResultManifest, StatusRecord, ToolCommand, ToolOutcome,
    read_status,
};
use covvar_web::report::{ReportFormat, render_report};
use covvar_web::results::{compute_statistics, consolidate};
use covvar_web::sequence::{SequenceDatabase, SequenceSource};
use covvar_web::submission::{SubmissionRequest, prepare_job};
use covvar_web::{Error, Result};

const THREE_SEQUENCES: &str = ">s1\nMKV\n>s2\nMKL\n>s3\nMKI\n";

#[derive(Default)]
struct ScriptedTool {
    calls: Mutex<Vec<ToolCommand>>,
    seen: Mutex<Vec<StatusRecord>>,
    fail_phase: Option<u8>,
}

fn arg_after(command: &ToolCommand, flag: &str) -> String {
    let pos = command
        .args
        .iter()
        .position(|a| a == flag)
        .unwrap_or_else(|| panic!("missing {flag}"));
    command.args[pos + 1].clone()
}

#[async_trait]
impl CommandRunner for ScriptedTool {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutcome> {
        let input = PathBuf::from(arg_after(command, "-f"));
        let out_dir = PathBuf::from(arg_after(command, "-o"));

        self.calls.lock().unwrap().push(command.clone());
        let status = read_status(&out_dir).await?.expect("status written before run");
        self.seen.lock().unwrap().push(status);

        if command.phase.is_some() && command.phase == self.fail_phase {
            return Ok(ToolOutcome::Failed {
                exit_code: Some(2),
                stderr: "model weights missing".to_string(),
            });
        }

        let fasta = tokio::fs::read_to_string(&input).await?;
        let ids: Vec<&str> = fasta
            .lines()
            .filter_map(|l| l.strip_prefix('>'))
            .collect();

        let phases: Vec<u8> = match command.phase {
            Some(phase) => vec![phase],
            None => (1..=5).collect(),
        };
        let stem = input.file_stem().unwrap().to_string_lossy().to_string();
        for phase in phases {
            let mut csv = String::from("Sequence_ID,Prediction,Confidence\n");
            for (i, id) in ids.iter().enumerate() {
                let label = if i % 2 == 0 { "Virus" } else { "Non-virus" };
                csv.push_str(&format!("{id},{label},0.9{i}\n"));
            }
            let name = format!("{stem}_phase_{phase}_results.csv");
            tokio::fs::write(out_dir.join(name), csv).await?;
        }
        Ok(ToolOutcome::Success)
    }
}

struct NoRemote;

#[async_trait]
impl SequenceSource for NoRemote {
    async fn fetch(&self, accession: &str, _database: SequenceDatabase) -> Result<String> {
        Err(Error::Fetch(format!("no remote lookups in tests: {accession}")))
    }
}

fn config(root: &Path) -> AppConfig {
    AppConfig {
        jobs_dir: root.join("jobs"),
        upload_dir: root.join("uploads"),
        log_dir: root.join("logs"),
        ..AppConfig::default()
    }
}

fn text_request(phases: &[&str]) -> SubmissionRequest {
    SubmissionRequest {
        sequence_text: Some(THREE_SEQUENCES.to_string()),
        phases: phases.iter().map(|p| p.to_string()).collect(),
        ..SubmissionRequest::default()
    }
}

async fn run_job(
    config: &AppConfig,
    tool: Arc<ScriptedTool>,
    job_id: &str,
    request: &SubmissionRequest,
) -> PathBuf {
    let job = prepare_job(config, &NoRemote, job_id, request).await.unwrap();
    let handle = JobRunner::with_command_runner(config, tool)
        .submit(job)
        .await
        .unwrap();
    let job_dir = handle.job_dir.clone();
    handle.wait().await;
    job_dir
}

#[tokio::test]
async fn test_single_phase_with_custom_thresholds() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(temp_dir.path());
    let tool = Arc::new(ScriptedTool::default());

    let mut request = text_request(&["1"]);
    request.thresholds.insert(1, "60,40".to_string());

    let job_dir = run_job(&config, tool.clone(), "job-e2e", &request).await;

    let status = read_status(&job_dir).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.progress, 100);

    let calls = tool.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].phase, Some(1));
    let t = calls[0].args.iter().position(|a| a == "--thresholds").unwrap();
    assert_eq!(calls[0].args[t + 1..t + 3], ["60".to_string(), "40".to_string()]);

    let manifest = ResultManifest::load_required(&job_dir).unwrap();
    assert_eq!(manifest.phases.keys().collect::<Vec<_>>(), vec!["phase_1"]);

    let stats = compute_statistics(&job_dir).unwrap().unwrap();
    assert_eq!(stats.total_sequences, 3);
    assert_eq!(stats.phases_completed, 1);
    let counts = &stats.phase_statistics["phase_1"];
    assert_eq!(counts.get("Virus"), Some(2));
    assert_eq!(counts.get("Non-virus"), Some(1));
}

#[tokio::test]
async fn test_progress_never_decreases_before_terminal() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(temp_dir.path());
    let tool = Arc::new(ScriptedTool::default());

    let job_dir = run_job(&config, tool.clone(), "job-mono", &text_request(&["1", "2", "4"])).await;

    let mut progress: Vec<u8> = tool.seen.lock().unwrap().iter().map(|s| s.progress).collect();
    let status = read_status(&job_dir).await.unwrap().unwrap();
    progress.push(status.progress);

    assert_eq!(status.status, JobStatus::Completed);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert!(
        tool.seen
            .lock()
            .unwrap()
            .iter()
            .all(|s| s.status == JobStatus::Running)
    );
}

#[tokio::test]
async fn test_combined_run_reports_all_phases() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(temp_dir.path());
    let tool = Arc::new(ScriptedTool::default());

    let job_dir = run_job(&config, tool.clone(), "job-all", &text_request(&["all"])).await;

    assert_eq!(tool.calls.lock().unwrap().len(), 1);
    assert!(tool.calls.lock().unwrap()[0].args.contains(&"--all-phases".to_string()));

    let results = consolidate(&job_dir).unwrap().unwrap();
    assert_eq!(results.job_id, "job-all");
    assert_eq!(results.phases.len(), 5);
    assert_eq!(results.statistics_summary.phases_completed, 5);
    assert_eq!(results.phases["phase_3"].len(), 3);
    assert_eq!(results.phases["phase_3"][0]["Sequence_ID"], "s1");
}

#[tokio::test]
async fn test_failed_phase_stops_the_job() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(temp_dir.path());
    let tool = Arc::new(ScriptedTool {
        fail_phase: Some(2),
        ..ScriptedTool::default()
    });

    let job_dir = run_job(&config, tool.clone(), "job-fail", &text_request(&["1", "2", "3"])).await;

    let status = read_status(&job_dir).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.progress, 0);
    assert_eq!(status.message, "Phase 2 failed");
    assert_eq!(status.error.as_deref(), Some("model weights missing"));

    // Phase 3 never ran and no manifest was written.
    assert_eq!(tool.calls.lock().unwrap().len(), 2);
    assert!(ResultManifest::load(&job_dir).unwrap().is_none());
    assert!(matches!(
        render_report(&job_dir, "job-fail", ReportFormat::Csv),
        Err(Error::ResultsNotFound { .. })
    ));
}

#[tokio::test]
async fn test_reports_for_completed_job() {
    let temp_dir = TempDir::new().unwrap();
    let config = config(temp_dir.path());
    let tool = Arc::new(ScriptedTool::default());

    let job_dir = run_job(&config, tool, "job-rep", &text_request(&["1", "3"])).await;

    let excel = render_report(&job_dir, "job-rep", ReportFormat::Excel).unwrap();
    assert!(excel.ends_with("job-rep_results.xlsx"));
    let pdf = render_report(&job_dir, "job-rep", ReportFormat::Pdf).unwrap();
    assert!(std::fs::read(&pdf).unwrap().starts_with(b"%PDF"));
    let csv = render_report(&job_dir, "job-rep", ReportFormat::Csv).unwrap();
    assert!(
        csv.file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_phase_1_results.csv")
    );
}
