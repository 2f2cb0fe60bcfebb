//! Orchard Scan
//!
//! Classical crop-disease detection for farm imagery and farm-scale health
//! aggregation. Images are segmented against per-crop disease signatures,
//! scored, bucketed by severity, reduced to per-image health reports and
//! finally folded into a farm session that can be exported as JSON or CSV.

pub mod config;
pub mod detection;
pub mod error;
pub mod farm;
pub mod health;
pub mod paths;

pub use config::ScanConfig;
pub use detection::{ClassicalDetector, Detection, DiseaseDetector, SignatureRegistry};
pub use error::{Result, ScanError};
pub use farm::{FarmReport, FarmSession, FarmSessionState, Location, TreeRecord};
pub use health::{HealthAnalyzer, HealthStatus, ImageAnalysis, ImageHealthReport};

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Per-mission log file, active while a scan session is being recorded.
static SESSION_LOG: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Logs a message to both console and log file with timestamp.
///
/// When a session log is active the line is appended there as well.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    print!("{}", line);

    let log_path = paths::get_logs_dir().join("orchard_scan.log");
    append_line(&log_path, &line);

    if let Ok(session) = SESSION_LOG.lock() {
        if let Some(path) = session.as_ref() {
            append_line(path, &line);
        }
    }
}

/// Activates (or with `None`, deactivates) the per-session log file.
pub fn set_session_log(path: Option<PathBuf>) {
    if let Ok(mut session) = SESSION_LOG.lock() {
        *session = path;
    }
}

fn append_line(path: &Path, line: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = file.write_all(line.as_bytes());
    }
}
