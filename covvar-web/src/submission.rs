//! Turning a client submission into a runnable job.
//!
//! Everything here happens before a job exists: input is stored in the upload
//! directory and validated, options are parsed, and any problem is reported
//! as a validation or fetch error for the submitter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::AppConfig;
use crate::job::model::{
    Job, JobOptions, PhaseSelection, SequenceType, THRESHOLD_PHASES, Thresholds,
};
use crate::sequence::{SequenceDatabase, SequenceSource, validate_fasta};
use crate::utils::fs::{ensure_dir_all_with_op, io_error, sanitize_filename};
use crate::{Error, Result};

/// An uploaded input file.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Raw submission fields as received from the client.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRequest {
    pub upload: Option<UploadedFile>,
    pub sequence_text: Option<String>,
    pub accession_id: Option<String>,
    pub database: Option<String>,
    /// Phase values; empty or containing `all` selects every phase.
    pub phases: Vec<String>,
    /// Raw `"low,high"` pairs keyed by phase.
    pub thresholds: BTreeMap<u8, String>,
    pub verbose: bool,
    pub sequence_type: Option<String>,
    pub email: Option<String>,
}

/// Where the sequences of a submission come from.
#[derive(Debug, Clone)]
enum InputSource<'a> {
    Upload(&'a UploadedFile),
    Text(&'a str),
    Accession { accession: &'a str, database: &'a str },
}

impl SubmissionRequest {
    /// Pick the input: an upload first, then pasted text, then an accession.
    fn input(&self) -> Option<InputSource<'_>> {
        if let Some(upload) = &self.upload
            && !upload.filename.trim().is_empty()
        {
            return Some(InputSource::Upload(upload));
        }
        if let Some(text) = &self.sequence_text
            && !text.trim().is_empty()
        {
            return Some(InputSource::Text(text));
        }
        if let Some(accession) = &self.accession_id
            && !accession.trim().is_empty()
        {
            return Some(InputSource::Accession {
                accession: accession.trim(),
                database: self.database.as_deref().unwrap_or("ncbi"),
            });
        }
        None
    }
}

/// Parse custom thresholds for the selected threshold-capable phases.
fn parse_thresholds(
    phases: &PhaseSelection,
    raw: &BTreeMap<u8, String>,
) -> Result<BTreeMap<u8, Thresholds>> {
    let PhaseSelection::Phases(selected) = phases else {
        return Ok(BTreeMap::new());
    };

    let mut thresholds = BTreeMap::new();
    for phase in selected.iter().filter(|p| THRESHOLD_PHASES.contains(p)) {
        let Some(value) = raw.get(phase).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let parsed: Thresholds = value.parse().map_err(|_| {
            Error::validation(format!("Invalid threshold values for phase {phase}"))
        })?;
        thresholds.insert(*phase, parsed);
    }
    Ok(thresholds)
}

async fn write_input(path: &Path, content: &[u8]) -> Result<()> {
    tokio::fs::write(path, content)
        .await
        .map_err(|e| io_error("writing input file", path, e))
}

/// Validate `request`, store its input and build the job `job_id`.
pub async fn prepare_job(
    config: &AppConfig,
    sequences: &dyn SequenceSource,
    job_id: &str,
    request: &SubmissionRequest,
) -> Result<Job> {
    let phases = PhaseSelection::from_values(&request.phases)?;
    let thresholds = parse_thresholds(&phases, &request.thresholds)?;
    let sequence_type = match request.sequence_type.as_deref() {
        Some(raw) => raw.parse()?,
        None => SequenceType::default(),
    };

    let input = request.input().ok_or_else(|| {
        Error::validation(
            "No input provided. Please upload a file, paste sequences, or provide an accession ID.",
        )
    })?;

    let (file_name, content): (String, Vec<u8>) = match input {
        InputSource::Upload(upload) => {
            if !config.is_allowed_upload(&upload.filename) {
                return Err(Error::validation(format!(
                    "File type not allowed. Allowed extensions: {}",
                    config.allowed_extensions.join(", ")
                )));
            }
            let name = format!("{}_{}", job_id, sanitize_filename(&upload.filename));
            (name, upload.content.clone())
        }
        InputSource::Text(text) => (format!("{job_id}_input.fasta"), text.as_bytes().to_vec()),
        InputSource::Accession {
            accession,
            database,
        } => {
            let database: SequenceDatabase = database.parse()?;
            let fasta = sequences.fetch(accession, database).await?;
            let name = format!("{}_{}.fasta", job_id, sanitize_filename(accession));
            (name, fasta.into_bytes())
        }
    };

    let text = std::str::from_utf8(&content)
        .map_err(|_| Error::validation("Input is not valid UTF-8 text"))?;
    let count = validate_fasta(text, config.max_sequences)?;

    ensure_dir_all_with_op("creating upload directory", &config.upload_dir).await?;
    let input_file: PathBuf = config.upload_dir.join(&file_name);
    write_input(&input_file, &content).await?;

    info!(
        job_id,
        sequences = count,
        phases = %phases,
        input = %input_file.display(),
        "Submission accepted"
    );

    let options = JobOptions {
        verbose: request.verbose,
        sequence_type,
        thresholds,
        email: request
            .email
            .as_ref()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()),
    };

    Ok(Job::new(
        job_id,
        input_file,
        phases,
        options,
        config.job_dir(job_id),
    ))
}
