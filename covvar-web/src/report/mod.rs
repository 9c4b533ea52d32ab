//! Downloadable reports.
//!
//! Reports are rendered on demand into the job directory from the manifest;
//! rendering never modifies the manifest or the phase files.

pub mod excel;
pub mod pdf;

use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use excel::render_excel;
pub use pdf::render_pdf;

use crate::results::first_phase_csv;
use crate::{Error, Result};

/// Download formats offered for a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Excel,
    Pdf,
    Csv,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Excel => "xlsx",
            Self::Pdf => "pdf",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv",
        }
    }

    /// File name suggested to the client.
    pub fn download_name(self, job_id: &str) -> String {
        format!("deepcovvar_results_{}.{}", job_id, self.extension())
    }
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "excel" => Ok(Self::Excel),
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            _ => Err(Error::validation(
                "Invalid format. Supported formats: excel, pdf, csv",
            )),
        }
    }
}

/// Produce the report file for `format` and return its path.
///
/// Spreadsheet and document reports are (re)written as
/// `<job_id>_results.<ext>` in `job_dir`; the CSV report is the first phase
/// file itself. Blocking.
pub fn render_report(job_dir: &Path, job_id: &str, format: ReportFormat) -> Result<PathBuf> {
    match format {
        ReportFormat::Excel | ReportFormat::Pdf => {
            let output = job_dir.join(format!("{}_results.{}", job_id, format.extension()));
            if format == ReportFormat::Excel {
                render_excel(job_dir, &output)?;
            } else {
                render_pdf(job_dir, &output)?;
            }
            Ok(output)
        }
        ReportFormat::Csv => first_phase_csv(job_dir)?
            .ok_or_else(|| Error::not_found("Phase results", job_id)),
    }
}
