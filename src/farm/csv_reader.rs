//! CSV reader for exported tree logs.
//!
//! Parses the CSV written by the exporter back into tree records so a
//! summary can be recomputed offline.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

use super::export::DISEASE_DELIMITER;
use super::session::{Location, TreeRecord};
use crate::health::HealthStatus;

/// Loads tree records from an exported CSV file.
///
/// Skips the header row, blank lines and any malformed rows (with warning log).
pub fn read_tree_log(path: &Path) -> Result<Vec<TreeRecord>> {
    let content =
        fs::read_to_string(path).context(format!("Failed to open CSV file: {}", path.display()))?;
    Ok(parse_tree_log(&content))
}

/// Parses CSV text with a header row into tree records.
pub fn parse_tree_log(content: &str) -> Vec<TreeRecord> {
    let mut records = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        // Skip header row
        if line_num == 0 {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                crate::log(&format!(
                    "Warning: Skipping malformed CSV row {}: {}",
                    line_num + 1,
                    e
                ));
            }
        }
    }

    records
}

/// Splits one CSV line, honoring double-quoted fields.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn parse_line(line: &str) -> Result<TreeRecord> {
    let parts = split_fields(line);
    if parts.len() != 6 {
        return Err(anyhow!("Expected 6 columns, got {}", parts.len()));
    }

    let tree_id = parts[0].trim().parse::<u64>().context("Invalid tree id")?;
    let x = parts[1].trim().parse::<f64>().context("Invalid x")?;
    let y = parts[2].trim().parse::<f64>().context("Invalid y")?;
    let health_score = parts[3].trim().parse::<f64>().context("Invalid health score")?;
    let status = HealthStatus::parse(parts[4].trim())
        .ok_or_else(|| anyhow!("Unknown status: {}", parts[4]))?;
    let diseases = parts[5]
        .split(DISEASE_DELIMITER)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect();

    Ok(TreeRecord {
        tree_id,
        location: Location::new(x, y),
        health_score,
        status,
        diseases,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::farm::report::FarmSummary;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "tree_id,x,y,health_score,status,diseases";

    fn create_test_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_parse_valid_csv() {
        let csv = format!(
            "{}\n1,0,0,95,Excellent,\n2,1,0,40,Poor,black_rot;apple_scab\n",
            HEADER
        );
        let file = create_test_csv(&csv);
        let records = read_tree_log(file.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tree_id, 1);
        assert!(records[0].diseases.is_empty());
        assert_eq!(records[1].status, HealthStatus::Poor);
        assert_eq!(records[1].diseases, vec!["black_rot", "apple_scab"]);
    }

    #[test]
    fn test_skips_malformed_and_blank_rows() {
        let csv = format!(
            "{}\n1,0,0,95,Excellent,\n\nnot,a,row\n3,2,0,fifty,Fair,\n4,3,0,50,Unknown,\n5,4,0,30,Poor,rust\n",
            HEADER
        );
        let records = parse_tree_log(&csv);
        let ids: Vec<u64> = records.iter().map(|r| r.tree_id).collect();
        assert_eq!(ids, vec![1, 5]);
    }

    #[test]
    fn test_quoted_fields() {
        let fields = split_fields("1,2,\"a,b\",\"say \"\"hi\"\"\"");
        assert_eq!(fields, vec!["1", "2", "a,b", "say \"hi\""]);
    }

    #[test]
    fn test_header_only() {
        assert!(parse_tree_log(&format!("{}\n", HEADER)).is_empty());
    }

    #[test]
    fn test_summary_from_csv() {
        let csv = format!(
            "{}\n1,0,0,95,Excellent,\n2,1,0,40,Poor,rust\n3,2,0,85,Good,\n4,3,0,60,Fair,rust\n5,4,0,30,Poor,rust\n",
            HEADER
        );
        let summary = FarmSummary::from_records(&parse_tree_log(&csv));
        assert_eq!(summary.total_trees, 5);
        assert_eq!(summary.healthy_trees, 2);
        assert!((summary.average_health_score - 62.0).abs() < 1e-9);
        assert!((summary.health_percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file() {
        assert!(read_tree_log(Path::new("/nonexistent/trees.csv")).is_err());
    }
}
