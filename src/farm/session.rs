//! Farm session accumulator.
//!
//! One `FarmSession` per mission holds the running tree log and disease
//! distribution. Every mutation happens under one mutex and is a complete
//! transaction, so concurrent ingests keep ids strictly increasing and
//! snapshots never see half a record.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::detection::CropSignatures;
use crate::error::{Result, ScanError};
use crate::health::{DiseaseCounts, HealthStatus, ImageHealthReport};

/// Opaque 2-D position of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One accumulated per-image observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub tree_id: u64,
    #[serde(rename = "gps_location")]
    pub location: Location,
    pub health_score: f64,
    pub status: HealthStatus,
    pub diseases: Vec<String>,
}

/// Point-in-time copy of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmSessionState {
    pub mission_id: String,
    pub crop_type: String,
    pub tree_log: Vec<TreeRecord>,
    pub disease_distribution: DiseaseCounts,
    pub created_at: DateTime<Local>,
    /// Number of state-changing operations applied so far
    pub mutation_count: u64,
}

impl FarmSessionState {
    pub fn is_empty(&self) -> bool {
        self.tree_log.is_empty()
    }
}

struct Inner {
    state: FarmSessionState,
    next_tree_id: u64,
}

/// The single shared mutable resource of a mission.
pub struct FarmSession {
    inner: Mutex<Inner>,
    row_length: u32,
}

impl FarmSession {
    /// Starts an empty session for `crop_type`.
    pub fn new(crop_type: &str, row_length: u32) -> Self {
        let created_at = Local::now();
        let mission_id = format!("FARM_SCAN_{}", created_at.format("%Y%m%d_%H%M%S"));
        crate::log(&format!("Farm session {} started for {}", mission_id, crop_type));

        Self {
            inner: Mutex::new(Inner {
                state: FarmSessionState {
                    mission_id,
                    crop_type: crop_type.to_string(),
                    tree_log: Vec::new(),
                    disease_distribution: DiseaseCounts::new(),
                    created_at,
                    mutation_count: 0,
                },
                next_tree_id: 1,
            }),
            row_length: row_length.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| ScanError::SessionPoisoned)
    }

    pub fn mission_id(&self) -> Result<String> {
        Ok(self.lock()?.state.mission_id.clone())
    }

    /// Grid position used when no location is supplied.
    pub fn synthetic_location(&self, tree_id: u64) -> Location {
        let index = tree_id.saturating_sub(1);
        let row = self.row_length as u64;
        Location::new((index % row) as f64, (index / row) as f64)
    }

    /// Appends one tree record for `report` and merges its disease counts.
    ///
    /// `signatures` decides which label is the healthy one; it is left out of
    /// the record's disease list but still counted in the distribution.
    pub fn ingest(
        &self,
        report: &ImageHealthReport,
        location: Option<Location>,
        signatures: Option<&CropSignatures>,
    ) -> Result<TreeRecord> {
        let diseases = report.disease_labels(signatures);

        let mut inner = self.lock()?;
        let tree_id = inner.next_tree_id;
        let record = TreeRecord {
            tree_id,
            location: location.unwrap_or_else(|| self.synthetic_location(tree_id)),
            health_score: report.overall_health,
            status: report.status,
            diseases,
        };

        inner.next_tree_id += 1;
        inner.state.tree_log.push(record.clone());
        inner.state.disease_distribution.merge(&report.disease_summary);
        inner.state.mutation_count += 1;
        drop(inner);

        crate::log(&format!(
            "Ingested tree {}: health {:.1} ({})",
            record.tree_id, record.health_score, record.status
        ));
        Ok(record)
    }

    /// Clears the tree log and distribution. Resetting an empty session is a no-op.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.next_tree_id = 1;
        if inner.state.tree_log.is_empty() && inner.state.disease_distribution.is_empty() {
            return Ok(());
        }
        let cleared = inner.state.tree_log.len();
        inner.state.tree_log.clear();
        inner.state.disease_distribution.clear();
        inner.state.mutation_count += 1;
        drop(inner);

        crate::log(&format!("Farm session reset ({} trees cleared)", cleared));
        Ok(())
    }

    /// Consistent copy of the current state.
    pub fn snapshot(&self) -> Result<FarmSessionState> {
        Ok(self.lock()?.state.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.state.tree_log.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
