//! Single-writer ingest queue in front of the farm session.
//!
//! Analysis workers (or any other producer) send finished reports through
//! the channel; one worker drains it and applies each report to the session
//! in arrival order.

use std::sync::mpsc::{channel, Receiver, Sender};

use super::session::{FarmSession, Location, TreeRecord};
use crate::detection::CropSignatures;
use crate::health::ImageHealthReport;

/// A finished report waiting to be ingested.
#[derive(Debug, Clone)]
pub struct IngestItem {
    /// Source name (file name or caller-supplied label)
    pub name: String,
    pub report: ImageHealthReport,
    pub location: Option<Location>,
}

impl IngestItem {
    pub fn new(name: impl Into<String>, report: ImageHealthReport, location: Option<Location>) -> Self {
        Self {
            name: name.into(),
            report,
            location,
        }
    }
}

/// Creates a new ingest queue.
///
/// Returns a tuple of (sender, receiver). The channel is unbounded.
pub fn create_ingest_queue() -> (Sender<IngestItem>, Receiver<IngestItem>) {
    channel()
}

/// Runs the ingest loop until every sender is dropped.
///
/// Returns the records created, in ingestion order. A failed ingest is
/// logged and the loop moves on to the next item.
pub fn run_ingest_worker(
    receiver: Receiver<IngestItem>,
    session: &FarmSession,
    signatures: Option<&CropSignatures>,
) -> Vec<TreeRecord> {
    let mut records = Vec::new();

    for item in receiver {
        match session.ingest(&item.report, item.location, signatures) {
            Ok(record) => records.push(record),
            Err(e) => {
                crate::log(&format!("Ingest worker: failed to ingest {}: {}", item.name, e));
            }
        }
    }

    crate::log(&format!("Ingest worker: channel closed after {} records", records.len()));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{DiseaseCounts, HealthStatus};
    use std::thread;

    fn report(health: f64) -> ImageHealthReport {
        ImageHealthReport {
            crop_type: "apple".to_string(),
            overall_health: health,
            status: HealthStatus::from_health(health),
            disease_summary: DiseaseCounts::new(),
            total_detections: 0,
            damaged_area_stats: None,
            recommendations: Vec::new(),
            advisories: Vec::new(),
            detections: Vec::new(),
        }
    }

    #[test]
    fn test_queue_preserves_order() {
        let (sender, receiver) = create_ingest_queue();
        for i in 1..=5 {
            sender
                .send(IngestItem::new(format!("img_{}.png", i), report(i as f64 * 10.0), None))
                .unwrap();
        }
        drop(sender);

        let session = FarmSession::new("apple", 10);
        let records = run_ingest_worker(receiver, &session, None);

        let scores: Vec<f64> = records.iter().map(|r| r.health_score).collect();
        assert_eq!(scores, vec![10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(session.len().unwrap(), 5);
    }

    #[test]
    fn test_worker_exits_when_channel_closes() {
        let (sender, receiver) = create_ingest_queue();
        let session = FarmSession::new("apple", 10);

        thread::scope(|scope| {
            let handle = scope.spawn(|| run_ingest_worker(receiver, &session, None));
            sender.send(IngestItem::new("a.png", report(90.0), None)).unwrap();
            drop(sender);
            let records = handle.join().unwrap();
            assert_eq!(records.len(), 1);
        });
    }
}
