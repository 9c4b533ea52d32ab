//! Consolidated results and per-job statistics derived from the manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::warn;

use super::table::{LabelCounts, PhaseTable, cell_to_json};
use crate::Result;
use crate::job::reconciler::ResultManifest;

/// A manifest phase whose file loaded successfully.
#[derive(Debug, Clone)]
pub struct LoadedPhase {
    pub key: String,
    pub path: PathBuf,
    pub table: PhaseTable,
}

/// Load every phase file referenced by `manifest`, in manifest order.
///
/// Files that are missing or unreadable are skipped.
pub fn load_phases(manifest: &ResultManifest, job_dir: &Path) -> Vec<LoadedPhase> {
    manifest
        .phase_files(job_dir)
        .into_iter()
        .filter_map(|(key, path)| match PhaseTable::load(&path) {
            Ok(table) => Some(LoadedPhase { key, path, table }),
            Err(e) => {
                warn!(phase = %key, path = %path.display(), "Skipping unreadable phase results: {}", e);
                None
            }
        })
        .collect()
}

/// Aggregate counts for a finished job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatistics {
    /// Row count of the first loaded phase.
    pub total_sequences: usize,
    /// Number of phases recorded in the manifest.
    pub phases_completed: usize,
    /// Label distribution for each phase with a prediction column.
    pub phase_statistics: BTreeMap<String, LabelCounts>,
}

impl JobStatistics {
    fn from_loaded(manifest: &ResultManifest, phases: &[LoadedPhase]) -> Self {
        Self {
            total_sequences: phases.first().map_or(0, |p| p.table.row_count()),
            phases_completed: manifest.phases.len(),
            phase_statistics: label_statistics(phases),
        }
    }
}

fn label_statistics(phases: &[LoadedPhase]) -> BTreeMap<String, LabelCounts> {
    phases
        .iter()
        .filter_map(|p| p.table.label_counts().map(|c| (p.key.clone(), c)))
        .collect()
}

/// Statistics for the job stored in `job_dir`, or `None` without a manifest.
pub fn compute_statistics(job_dir: &Path) -> Result<Option<JobStatistics>> {
    let Some(manifest) = ResultManifest::load(job_dir)? else {
        return Ok(None);
    };
    let phases = load_phases(&manifest, job_dir);
    Ok(Some(JobStatistics::from_loaded(&manifest, &phases)))
}

type Row = serde_json::Map<String, serde_json::Value>;

/// Every row of every phase together with the label distributions.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedResults {
    pub job_id: String,
    pub timestamp: DateTime<Local>,
    pub phases: BTreeMap<String, Vec<Row>>,
    pub statistics: BTreeMap<String, LabelCounts>,
    pub statistics_summary: JobStatistics,
}

fn table_rows(table: &PhaseTable) -> Vec<Row> {
    table
        .rows()
        .iter()
        .map(|row| {
            table
                .headers()
                .iter()
                .zip(row)
                .map(|(header, cell)| (header.clone(), cell_to_json(cell)))
                .collect()
        })
        .collect()
}

/// Consolidate the job stored in `job_dir`, or `None` without a manifest.
pub fn consolidate(job_dir: &Path) -> Result<Option<ConsolidatedResults>> {
    let Some(manifest) = ResultManifest::load(job_dir)? else {
        return Ok(None);
    };
    let loaded = load_phases(&manifest, job_dir);

    Ok(Some(ConsolidatedResults {
        job_id: manifest.job_id.clone(),
        timestamp: manifest.timestamp,
        phases: loaded
            .iter()
            .map(|p| (p.key.clone(), table_rows(&p.table)))
            .collect(),
        statistics: label_statistics(&loaded),
        statistics_summary: JobStatistics::from_loaded(&manifest, &loaded),
    }))
}

/// File of the first manifest phase, used for the raw CSV download.
pub fn first_phase_csv(job_dir: &Path) -> Result<Option<PathBuf>> {
    let manifest = ResultManifest::load_required(job_dir)?;
    Ok(manifest
        .phase_files(job_dir)
        .into_iter()
        .next()
        .map(|(_, path)| path))
}
