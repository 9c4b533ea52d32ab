//! Spreadsheet report: one styled sheet per phase.

use std::path::Path;

use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet};
use tracing::debug;

use crate::Result;
use crate::job::reconciler::ResultManifest;
use crate::results::{LoadedPhase, PhaseTable, load_phases};

/// Header fill colour.
const HEADER_FILL: u32 = 0x1F4788;

/// Upper bound for auto-sized column widths.
const MAX_COLUMN_WIDTH: usize = 50;

/// Sheet name for a phase key: `phase_1` becomes `Phase 1`.
pub fn sheet_title(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Width of each column: longest value plus padding, capped.
pub fn column_widths(table: &PhaseTable) -> Vec<usize> {
    table
        .headers()
        .iter()
        .enumerate()
        .map(|(col, header)| {
            let longest = table
                .rows()
                .iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(header.chars().count()))
                .max()
                .unwrap_or(0);
            (longest + 2).min(MAX_COLUMN_WIDTH)
        })
        .collect()
}

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_align(FormatAlign::Center)
}

fn write_sheet(worksheet: &mut Worksheet, phase: &LoadedPhase, header: &Format) -> Result<()> {
    let table = &phase.table;
    worksheet.set_name(sheet_title(&phase.key))?;

    for (col, name) in table.headers().iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, name, header)?;
    }

    for (index, row) in table.rows().iter().enumerate() {
        let row_num = index as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            if cell.is_empty() {
                continue;
            }
            match cell.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => {
                    worksheet.write_number(row_num, col, number)?;
                }
                _ => {
                    worksheet.write_string(row_num, col, cell)?;
                }
            }
        }
    }

    for (col, width) in column_widths(table).into_iter().enumerate() {
        worksheet.set_column_width(col as u16, width as f64)?;
    }

    Ok(())
}

/// Render the spreadsheet report for the job in `job_dir` to `output`.
pub fn render_excel(job_dir: &Path, output: &Path) -> Result<()> {
    let manifest = ResultManifest::load_required(job_dir)?;
    let phases = load_phases(&manifest, job_dir);

    let mut workbook = Workbook::new();
    let header = header_format();

    for phase in &phases {
        let worksheet = workbook.add_worksheet();
        write_sheet(worksheet, phase, &header)?;
    }
    if phases.is_empty() {
        workbook.add_worksheet().set_name("Results")?;
    }

    workbook.save(output)?;
    debug!(
        job_id = %manifest.job_id,
        sheets = phases.len(),
        path = %output.display(),
        "Spreadsheet report written"
    );
    Ok(())
}
