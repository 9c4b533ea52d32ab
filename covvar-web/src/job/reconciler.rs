//! Result reconciliation.
//!
//! After a successful pipeline run the tool's per-phase CSV files are located
//! in the job directory and recorded in a manifest (`results.json`). The
//! manifest is written once and is the only thing reporting code reads to
//! find a job's data.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::model::{Job, phase_key};
use crate::utils::fs;
use crate::{Error, Result};

/// File name of the manifest inside a job directory.
pub const MANIFEST_FILE_NAME: &str = "results.json";

/// Candidate phase file names, highest priority first.
///
/// `{stem}` is the input file stem and `{phase}` the phase number.
pub const DEFAULT_RESULT_TEMPLATES: [&str; 2] = [
    "{stem}_phase_{phase}_results.csv",
    "phase_{phase}_results.csv",
];

/// Pipeline summary file name template.
pub const SUMMARY_TEMPLATE: &str = "{stem}_pipeline_summary.txt";

/// Consolidated record of a finished job's output files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultManifest {
    pub job_id: String,
    pub timestamp: DateTime<Local>,
    /// Phase key (`phase_k`) to result file, relative to the job directory.
    pub phases: BTreeMap<String, PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PathBuf>,
}

impl ResultManifest {
    /// Load the manifest of the job stored in `job_dir`, if one was written.
    pub fn load(job_dir: &Path) -> Result<Option<Self>> {
        fs::read_json_if_exists(&job_dir.join(MANIFEST_FILE_NAME))
    }

    /// Like [`ResultManifest::load`], but a missing manifest is an error.
    pub fn load_required(job_dir: &Path) -> Result<Self> {
        Self::load(job_dir)?.ok_or_else(|| Error::results_not_found(job_dir))
    }

    /// Phase keys with their absolute file paths, in manifest order.
    pub fn phase_files(&self, job_dir: &Path) -> Vec<(String, PathBuf)> {
        self.phases
            .iter()
            .map(|(key, path)| (key.clone(), resolve(job_dir, path)))
            .collect()
    }

    pub fn summary_file(&self, job_dir: &Path) -> Option<PathBuf> {
        self.summary.as_deref().map(|path| resolve(job_dir, path))
    }
}

fn resolve(job_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        job_dir.join(path)
    }
}

fn render(template: &str, stem: &str, phase: u8) -> String {
    template
        .replace("{stem}", stem)
        .replace("{phase}", &phase.to_string())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Locates phase output files and writes the manifest.
#[derive(Debug, Clone)]
pub struct ResultReconciler {
    templates: Vec<String>,
    summary_template: String,
}

impl Default for ResultReconciler {
    fn default() -> Self {
        Self {
            templates: DEFAULT_RESULT_TEMPLATES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            summary_template: SUMMARY_TEMPLATE.to_string(),
        }
    }
}

impl ResultReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a naming convention, probed after the existing ones.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.templates.push(template.into());
        self
    }

    /// Candidate file names for `phase`, in probe order.
    pub fn candidates(&self, stem: &str, phase: u8) -> Vec<String> {
        self.templates
            .iter()
            .map(|template| render(template, stem, phase))
            .collect()
    }

    /// First candidate for `phase` that exists in `job_dir`.
    pub async fn locate_phase(&self, job_dir: &Path, stem: &str, phase: u8) -> Option<String> {
        for candidate in self.candidates(stem, phase) {
            if is_file(&job_dir.join(&candidate)).await {
                return Some(candidate);
            }
        }
        None
    }

    /// Build the manifest for `job` from the files present in its directory.
    ///
    /// Phases without output are left out.
    pub async fn build(&self, job: &Job) -> ResultManifest {
        let job_dir = job.output_dir.as_path();
        let stem = job.input_stem();

        let mut phases = BTreeMap::new();
        for phase in job.phases.effective_phases() {
            match self.locate_phase(job_dir, &stem, phase).await {
                Some(file) => {
                    debug!(job_id = %job.id, phase, file = %file, "Located phase results");
                    phases.insert(phase_key(phase), PathBuf::from(file));
                }
                None => {
                    warn!(job_id = %job.id, phase, "No results file for phase");
                }
            }
        }

        let summary_name = render(&self.summary_template, &stem, 0);
        let summary = if is_file(&job_dir.join(&summary_name)).await {
            Some(PathBuf::from(summary_name))
        } else {
            None
        };

        ResultManifest {
            job_id: job.id.clone(),
            timestamp: Local::now(),
            phases,
            summary,
        }
    }

    /// Build and persist the manifest for `job`.
    pub async fn reconcile(&self, job: &Job) -> Result<ResultManifest> {
        let manifest = self.build(job).await;
        fs::write_json_atomic(&job.output_dir.join(MANIFEST_FILE_NAME), &manifest).await?;

        info!(
            job_id = %job.id,
            phases = manifest.phases.len(),
            has_summary = manifest.summary.is_some(),
            "Results manifest written"
        );

        Ok(manifest)
    }
}
