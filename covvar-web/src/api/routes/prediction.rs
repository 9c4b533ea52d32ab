//! Prediction job routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/predict` | Submit a job (multipart form) |
//! | GET | `/api/status/{job_id}` | Current job status |
//! | GET | `/api/results/{job_id}` | Consolidated results of a completed job |
//! | GET | `/api/download/{job_id}/{format}` | Report download (`excel`, `pdf`, `csv`) |
//! | POST | `/api/fetch_sequence` | Look up a sequence by accession |

use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::job::status::{JobStatus, StatusRecord, read_status};
use crate::report::{ReportFormat, render_report};
use crate::results::{ConsolidatedResults, consolidate};
use crate::sequence::SequenceDatabase;
use crate::submission::{SubmissionRequest, UploadedFile, prepare_job};

/// Create the prediction router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/predict", post(submit_prediction))
        .route("/status/{job_id}", get(get_job_status))
        .route("/results/{job_id}", get(get_job_results))
        .route("/download/{job_id}/{format}", get(download_results))
        .route("/fetch_sequence", post(fetch_sequence))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct FetchSequenceRequest {
    #[serde(default)]
    pub accession_id: String,
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchSequenceResponse {
    pub fasta: String,
    pub accession_id: String,
    pub database: String,
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::bad_request(format!("Invalid form data: {}", e))
}

/// Threshold field names look like `phase2_thresholds`.
fn threshold_phase(field: &str) -> Option<u8> {
    field
        .strip_prefix("phase")?
        .strip_suffix("_thresholds")?
        .parse()
        .ok()
}

async fn read_submission(mut multipart: Multipart) -> ApiResult<SubmissionRequest> {
    let mut request = SubmissionRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let content = field.bytes().await.map_err(multipart_error)?;
            request.upload = Some(UploadedFile {
                filename,
                content: content.to_vec(),
            });
            continue;
        }

        let value = field.text().await.map_err(multipart_error)?;
        match name.as_str() {
            "sequence_text" => request.sequence_text = Some(value),
            "accession_id" => request.accession_id = Some(value),
            "database" => request.database = Some(value),
            "phases" | "phases[]" => request.phases.push(value),
            "verbose" => request.verbose = value.trim().eq_ignore_ascii_case("true"),
            "sequence_type" => request.sequence_type = Some(value),
            "email" => request.email = Some(value),
            other => {
                if let Some(phase) = threshold_phase(other) {
                    request.thresholds.insert(phase, value);
                }
            }
        }
    }

    Ok(request)
}

/// Submit a prediction job.
async fn submit_prediction(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let request = read_submission(multipart).await?;
    let job_id = Uuid::new_v4().to_string();

    let job = prepare_job(&state.config, state.sequences.as_ref(), &job_id, &request).await?;
    state.runner.submit(job).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Pending,
            message: "Job submitted successfully".to_string(),
        }),
    ))
}

/// Directory of `job_id`; ids that are not UUIDs never name a job.
fn job_dir(state: &AppState, job_id: &str) -> ApiResult<PathBuf> {
    Uuid::parse_str(job_id).map_err(|_| ApiError::not_found("Job not found"))?;
    Ok(state.config.job_dir(job_id))
}

async fn existing_job_dir(state: &AppState, job_id: &str) -> ApiResult<PathBuf> {
    let dir = job_dir(state, job_id)?;
    if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        return Err(ApiError::not_found("Job not found"));
    }
    Ok(dir)
}

/// Get the status of a job.
async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusRecord>> {
    let dir = job_dir(&state, &job_id)?;
    let status = read_status(&dir)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(status))
}

/// Get the consolidated results of a completed job.
async fn get_job_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ConsolidatedResults>> {
    let dir = existing_job_dir(&state, &job_id).await?;

    let completed = read_status(&dir)
        .await?
        .is_some_and(|s| s.status == JobStatus::Completed);
    if !completed {
        return Err(ApiError::bad_request("Job not completed yet"));
    }

    let results = tokio::task::spawn_blocking(move || consolidate(&dir))
        .await
        .map_err(|e| ApiError::internal(format!("Results task failed: {}", e)))??;

    results
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Results not found"))
}

/// Download a report for a job.
async fn download_results(
    State(state): State<AppState>,
    Path((job_id, format)): Path<(String, String)>,
) -> ApiResult<Response> {
    let dir = existing_job_dir(&state, &job_id).await?;
    let format: ReportFormat = format.parse()?;

    let id = job_id.clone();
    let path = tokio::task::spawn_blocking(move || render_report(&dir, &id, format))
        .await
        .map_err(|e| ApiError::internal(format!("Report task failed: {}", e)))??;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| crate::Error::io_path("reading report", &path, e))?;

    let disposition = format!("attachment; filename=\"{}\"", format.download_name(&job_id));
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Fetch a sequence by accession.
async fn fetch_sequence(
    State(state): State<AppState>,
    Json(request): Json<FetchSequenceRequest>,
) -> ApiResult<Json<FetchSequenceResponse>> {
    let accession_id = request.accession_id.trim().to_string();
    if accession_id.is_empty() {
        return Err(ApiError::bad_request("Accession ID is required"));
    }
    let database_name = request.database.unwrap_or_else(|| "ncbi".to_string());
    let database: SequenceDatabase = database_name.parse()?;

    let fasta = state.sequences.fetch(&accession_id, database).await?;

    Ok(Json(FetchSequenceResponse {
        fasta,
        accession_id,
        database: database_name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_phase() {
        assert_eq!(threshold_phase("phase1_thresholds"), Some(1));
        assert_eq!(threshold_phase("phase3_thresholds"), Some(3));
        assert_eq!(threshold_phase("phase_thresholds"), None);
        assert_eq!(threshold_phase("email"), None);
    }
}
