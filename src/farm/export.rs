//! JSON and CSV export of farm reports.

use anyhow::{Context, Result as AnyResult};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::report::FarmReport;
use super::session::TreeRecord;
use crate::error::{Result, ScanError};

/// CSV header row.
pub const CSV_HEADER: &str = "tree_id,x,y,health_score,status,diseases";

/// Separator between disease labels inside the `diseases` column.
pub const DISEASE_DELIMITER: char = ';';

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Parses a format name (case-insensitive).
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(ScanError::ExportFormat(name.to_string())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Serializes a report in the given format.
pub fn export(report: &FarmReport, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ExportFormat::Csv => Ok(tree_log_to_csv(&report.tree_log)),
    }
}

/// Flattens the tree log into CSV, one row per tree.
pub fn tree_log_to_csv(tree_log: &[TreeRecord]) -> String {
    let mut out = String::with_capacity(64 * (tree_log.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');

    for record in tree_log {
        let diseases = record.diseases.join(&DISEASE_DELIMITER.to_string());
        let line = format!(
            "{},{},{},{},{},{}",
            record.tree_id,
            record.location.x,
            record.location.y,
            record.health_score,
            record.status,
            csv_field(&diseases),
        );
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Quotes a field if it contains a comma, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Exports a report and writes it to `output_path`.
pub fn write_export(report: &FarmReport, format: ExportFormat, output_path: &Path) -> AnyResult<()> {
    let content = export(report, format)
        .with_context(|| format!("Failed to export report as {}", format.extension()))?;

    let mut file = File::create(output_path)
        .context(format!("Failed to create export file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .context("Failed to write export data")?;

    crate::log(&format!(
        "Exported {} trees to {}",
        report.tree_log.len(),
        output_path.display()
    ));
    Ok(())
}
