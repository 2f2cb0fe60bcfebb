//! Farm-scale aggregation.
//!
//! This module provides:
//! - The mission-scoped farm session and its ingest queue
//! - The batch runner (parallel analysis, serialized ingestion)
//! - Farm report generation and farm-wide charts
//! - JSON/CSV export and reading exported CSV back

pub mod batch;
pub mod charts;
pub mod csv_reader;
pub mod export;
pub mod queue;
pub mod report;
pub mod session;

pub use batch::{process_batch, AbortHandle, BatchImage, BatchItemError, BatchOutcome};
pub use export::{export, write_export, ExportFormat};
pub use report::{FarmReport, FarmSummary, FarmVisualizations};
pub use session::{FarmSession, FarmSessionState, Location, TreeRecord};
