//! Document report: a textual summary of each phase.
//!
//! Layout is computed by [`document_lines`] and then drawn onto A4 pages, so
//! the content can be checked without parsing PDF output.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use printpdf::{
    BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerIndex,
    PdfPageIndex,
};
use tracing::debug;

use super::excel::sheet_title;
use crate::job::reconciler::ResultManifest;
use crate::results::{LoadedPhase, load_phases};
use crate::utils::fs::io_error;
use crate::{Error, Result};

pub const REPORT_TITLE: &str = "DeepCovVar Prediction Results";

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const MARGIN: f32 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Title,
    Heading,
    Body,
    /// Vertical gap, no text.
    Spacer,
}

impl LineStyle {
    fn font_size(self) -> f32 {
        match self {
            Self::Title => 16.0,
            Self::Heading => 14.0,
            Self::Body | Self::Spacer => 10.0,
        }
    }

    /// Vertical space the line occupies, in millimetres.
    fn height(self) -> f32 {
        match self {
            Self::Title | Self::Heading => 10.0,
            Self::Body => 6.0,
            Self::Spacer => 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub style: LineStyle,
    pub text: String,
}

impl ReportLine {
    fn new(style: LineStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }

    fn spacer() -> Self {
        Self::new(LineStyle::Spacer, "")
    }
}

/// Share of `count` in `total` as a one-decimal percentage.
pub fn percentage(count: usize, total: usize) -> String {
    if total == 0 {
        return "0.0".to_string();
    }
    format!("{:.1}", count as f64 / total as f64 * 100.0)
}

/// Text content of the report, top to bottom.
pub fn document_lines(manifest: &ResultManifest, phases: &[LoadedPhase]) -> Vec<ReportLine> {
    let mut lines = vec![
        ReportLine::new(LineStyle::Title, REPORT_TITLE),
        ReportLine::spacer(),
        ReportLine::new(LineStyle::Body, format!("Job ID: {}", manifest.job_id)),
        ReportLine::new(
            LineStyle::Body,
            format!(
                "Timestamp: {}",
                manifest.timestamp.format("%Y-%m-%d %H:%M:%S")
            ),
        ),
        ReportLine::spacer(),
    ];

    for phase in phases {
        let total = phase.table.row_count();
        lines.push(ReportLine::new(LineStyle::Heading, sheet_title(&phase.key)));
        lines.push(ReportLine::new(
            LineStyle::Body,
            format!("Total sequences: {total}"),
        ));

        if let Some(counts) = phase.table.label_counts() {
            lines.push(ReportLine::new(LineStyle::Body, "Prediction distribution:"));
            for (label, count) in counts.iter() {
                lines.push(ReportLine::new(
                    LineStyle::Body,
                    format!("  {label}: {count} ({}%)", percentage(count, total)),
                ));
            }
        }
        lines.push(ReportLine::spacer());
    }

    lines
}

fn pdf_error(e: printpdf::Error) -> Error {
    Error::Document(e.to_string())
}

fn draw(
    doc: &PdfDocumentReference,
    first_page: PdfPageIndex,
    first_layer: PdfLayerIndex,
    lines: &[ReportLine],
) -> Result<()> {
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(pdf_error)?;

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    let mut y = PAGE_HEIGHT.0 - MARGIN;

    for line in lines {
        let height = line.style.height();
        if y - height < MARGIN {
            let (page, page_layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
            layer = doc.get_page(page).get_layer(page_layer);
            y = PAGE_HEIGHT.0 - MARGIN;
        }
        y -= height;

        if line.style == LineStyle::Spacer {
            continue;
        }
        let font: &IndirectFontRef = match line.style {
            LineStyle::Title | LineStyle::Heading => &bold,
            _ => &regular,
        };
        let x = match line.style {
            LineStyle::Title => {
                // Builtin fonts have no metrics here; approximate centring.
                let width = line.text.chars().count() as f32 * line.style.font_size() * 0.18;
                ((PAGE_WIDTH.0 - width) / 2.0).max(MARGIN)
            }
            _ => MARGIN,
        };
        layer.use_text(line.text.as_str(), line.style.font_size(), Mm(x), Mm(y), font);
    }

    Ok(())
}

/// Render the document report for the job in `job_dir` to `output`.
pub fn render_pdf(job_dir: &Path, output: &Path) -> Result<()> {
    let manifest = ResultManifest::load_required(job_dir)?;
    let phases = load_phases(&manifest, job_dir);
    let lines = document_lines(&manifest, &phases);

    let (doc, page, layer) = PdfDocument::new(REPORT_TITLE, PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
    draw(&doc, page, layer, &lines)?;

    let file = File::create(output).map_err(|e| io_error("creating report", output, e))?;
    doc.save(&mut BufWriter::new(file)).map_err(pdf_error)?;

    debug!(
        job_id = %manifest.job_id,
        lines = lines.len(),
        path = %output.display(),
        "Document report written"
    );
    Ok(())
}
