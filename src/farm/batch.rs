//! Batch runner: parallel per-image analysis, serialized ingestion.
//!
//! Images are analyzed on a bounded rayon pool. Workers share nothing
//! mutable; once all of them finish, successful reports go through the
//! ingest queue in input order. Bad images are recorded per item and the
//! rest of the batch proceeds.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use super::queue::{create_ingest_queue, run_ingest_worker, IngestItem};
use super::session::{FarmSession, Location, TreeRecord};
use crate::error::{Result, ScanError};
use crate::health::{decode_image, HealthAnalyzer, ImageHealthReport};

/// One encoded image in a batch request.
#[derive(Debug, Clone)]
pub struct BatchImage {
    pub name: String,
    pub bytes: Vec<u8>,
    pub location: Option<Location>,
}

/// A batch item that could not be processed.
#[derive(Debug, Clone)]
pub struct BatchItemError {
    /// Position in the request
    pub index: usize,
    pub name: String,
    pub message: String,
}

/// What a batch run did.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Records created, in input order
    pub records: Vec<TreeRecord>,
    pub errors: Vec<BatchItemError>,
    /// True if the batch was stopped before every image was handled
    pub cancelled: bool,
}

/// Shared flag that stops a running batch between images.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decodes and analyzes one batch item, turning a panic inside the
/// pipeline into an error for that item alone.
fn analyze_item(analyzer: &HealthAnalyzer, item: &BatchImage, crop: &str) -> Result<ImageHealthReport> {
    let run = || decode_image(&item.bytes).and_then(|image| analyzer.report(&image, crop));
    match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ScanError::AnalysisFailed(msg))
        }
    }
}

/// Waits for the ingest worker. A dead worker may have applied records the
/// batch cannot report, so that is treated as a poisoned session.
fn join_ingest_worker(worker: ScopedJoinHandle<'_, Vec<TreeRecord>>) -> Result<Vec<TreeRecord>> {
    worker.join().map_err(|_| {
        crate::log("Ingest worker panicked");
        ScanError::SessionPoisoned
    })
}

/// Analyzes a batch of images and ingests every success into `session`.
///
/// Fails up front on an empty batch or an unknown crop. Everything after
/// that is per item: an undecodable image (or one whose analysis panics)
/// becomes a `BatchItemError`. Fails with `SessionPoisoned` if the ingest
/// worker dies, since the session may then hold records not in the outcome.
pub fn process_batch(
    analyzer: &HealthAnalyzer,
    session: &FarmSession,
    crop: &str,
    images: &[BatchImage],
    workers: usize,
    abort: &AbortHandle,
) -> Result<BatchOutcome> {
    if images.is_empty() {
        return Err(ScanError::EmptyBatch);
    }
    let signatures = analyzer.registry().crop(crop)?;

    let workers = workers.max(1);
    crate::log(&format!(
        "Batch started: {} images, crop {}, {} workers",
        images.len(),
        crop,
        workers
    ));

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("orchard-scan-worker-{}", i))
        .build()?;

    let results: Vec<Option<Result<ImageHealthReport>>> = pool.install(|| {
        images
            .par_iter()
            .map(|item| {
                if abort.is_aborted() {
                    return None;
                }
                Some(analyze_item(analyzer, item, crop))
            })
            .collect()
    });

    let mut errors = Vec::new();
    let (sender, receiver) = create_ingest_queue();

    let records = thread::scope(|scope| {
        let worker = scope.spawn(|| run_ingest_worker(receiver, session, Some(signatures)));

        for (index, (item, result)) in images.iter().zip(results).enumerate() {
            if abort.is_aborted() {
                break;
            }
            match result {
                Some(Ok(report)) => {
                    let queued = IngestItem::new(item.name.clone(), report, item.location);
                    if let Err(e) = sender.send(queued) {
                        // Receiver is gone, so the worker has died; join below reports it.
                        crate::log(&format!("Batch item {} ({}) not ingested: {}", index + 1, item.name, e));
                        break;
                    }
                }
                Some(Err(e)) => {
                    crate::log(&format!("Batch item {} ({}) failed: {}", index + 1, item.name, e));
                    errors.push(BatchItemError {
                        index,
                        name: item.name.clone(),
                        message: e.to_string(),
                    });
                }
                None => break,
            }
        }
        drop(sender);

        join_ingest_worker(worker)
    })?;

    let cancelled = abort.is_aborted() && records.len() + errors.len() < images.len();
    let outcome = BatchOutcome {
        records,
        errors,
        cancelled,
    };

    crate::log(&format!(
        "Batch finished: {} ingested, {} failed{}",
        outcome.records.len(),
        outcome.errors.len(),
        if outcome.cancelled { ", cancelled" } else { "" }
    ));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RenderConfig, ScanConfig};
    use crate::detection::{
        BoundingBox, Detection, DiseaseDetector, PixelPoint, SeverityBucket, SignatureRegistry,
    };
    use crate::farm::FarmReport;
    use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn analyzer() -> HealthAnalyzer {
        HealthAnalyzer::classical(Arc::new(SignatureRegistry::builtin()), &ScanConfig::default())
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        png_sized(40, 40, color)
    }

    fn png_sized(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    fn item(name: &str, bytes: Vec<u8>) -> BatchImage {
        BatchImage {
            name: name.to_string(),
            bytes,
            location: None,
        }
    }

    #[test]
    fn test_empty_batch_rejected() {
        let session = FarmSession::new("apple", 10);
        let result = process_batch(&analyzer(), &session, "apple", &[], 2, &AbortHandle::new());
        assert!(matches!(result, Err(ScanError::EmptyBatch)));
    }

    #[test]
    fn test_unknown_crop_fails_whole_batch() {
        let session = FarmSession::new("apple", 10);
        let images = vec![item("a.png", png([40, 160, 40]))];
        let result = process_batch(&analyzer(), &session, "mango", &images, 2, &AbortHandle::new());
        assert!(matches!(result, Err(ScanError::UnknownCropType(_))));
        assert!(session.is_empty().unwrap());
    }

    #[test]
    fn test_partial_failure() {
        let session = FarmSession::new("apple", 10);
        let images = vec![
            item("leaf1.png", png([40, 160, 40])),
            item("broken.png", b"not a png".to_vec()),
            item("leaf2.png", png([40, 160, 40])),
        ];
        let outcome = process_batch(&analyzer(), &session, "apple", &images, 3, &AbortHandle::new()).unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 1);
        assert_eq!(outcome.errors[0].name, "broken.png");
        assert!(!outcome.cancelled);

        let ids: Vec<u64> = outcome.records.iter().map(|r| r.tree_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(session.len().unwrap(), 2);
    }

    #[test]
    fn test_aborted_batch_leaves_session_consistent() {
        let session = FarmSession::new("apple", 10);
        let images = vec![item("leaf.png", png([40, 160, 40])); 4];
        let abort = AbortHandle::new();
        abort.abort();

        let outcome = process_batch(&analyzer(), &session, "apple", &images, 2, &abort).unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.records.is_empty());

        let state = session.snapshot().unwrap();
        assert_eq!(state.tree_log.len(), outcome.records.len());
    }

    #[test]
    fn test_single_pixel_image_is_processed() {
        let session = FarmSession::new("apple", 10);
        let images = vec![
            item("leaf.png", png([40, 160, 40])),
            item("tiny.png", png_sized(1, 1, [0, 0, 0])),
            item("tiny_green.png", png_sized(1, 1, [40, 160, 40])),
        ];
        let outcome = process_batch(&analyzer(), &session, "apple", &images, 2, &AbortHandle::new()).unwrap();

        assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(session.len().unwrap(), 3);
    }

    /// Backend that panics on images narrower than 10 pixels.
    struct FragileDetector;

    impl DiseaseDetector for FragileDetector {
        fn name(&self) -> &str {
            "fragile"
        }

        fn detect(&self, image: &RgbImage, _crop: &str) -> Result<Vec<Detection>> {
            assert!(image.width() >= 10, "image too narrow");
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_panicking_item_recorded_and_batch_continues() {
        let analyzer = HealthAnalyzer::new(
            Arc::new(FragileDetector),
            Arc::new(SignatureRegistry::builtin()),
            RenderConfig::default(),
        );
        let session = FarmSession::new("apple", 10);
        let images = vec![
            item("ok.png", png([40, 160, 40])),
            item("narrow.png", png_sized(4, 40, [40, 160, 40])),
            item("ok2.png", png([40, 160, 40])),
        ];
        let outcome = process_batch(&analyzer, &session, "apple", &images, 2, &AbortHandle::new()).unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].name, "narrow.png");
        assert!(outcome.errors[0].message.contains("image too narrow"));
        assert_eq!(session.len().unwrap(), outcome.records.len());
    }

    /// Backend that reads its result off the image: red = healthy regions,
    /// green = diseased regions.
    struct CountingDetector;

    impl DiseaseDetector for CountingDetector {
        fn name(&self) -> &str {
            "counting"
        }

        fn detect(&self, image: &RgbImage, crop: &str) -> Result<Vec<Detection>> {
            let [healthy, diseased, _] = image.get_pixel(0, 0).0;
            let labels = std::iter::repeat("healthy")
                .take(healthy as usize)
                .chain(std::iter::repeat("black_rot").take(diseased as usize));
            Ok(labels
                .enumerate()
                .map(|(i, label)| {
                    let x = (i as i32 % 8) * 4;
                    let y = (i as i32 / 8) * 4;
                    Detection {
                        region_id: i as u32 + 1,
                        crop: crop.to_string(),
                        disease_label: label.to_string(),
                        confidence: 0.8,
                        severity: SeverityBucket::Mild,
                        area_px: 9,
                        bbox: BoundingBox { x: x as u32, y: y as u32, width: 3, height: 3 },
                        boundary: vec![
                            PixelPoint { x, y },
                            PixelPoint { x: x + 2, y },
                            PixelPoint { x: x + 2, y: y + 2 },
                            PixelPoint { x, y: y + 2 },
                        ],
                    }
                })
                .collect())
        }
    }

    #[test]
    fn test_five_image_farm_scenario() {
        let registry = Arc::new(SignatureRegistry::builtin());
        let analyzer = HealthAnalyzer::new(Arc::new(CountingDetector), Arc::clone(&registry), RenderConfig::default());
        let session = FarmSession::new("apple", 10);

        // (healthy, diseased) -> 95, 40, 85, 60, 30
        let counts = [(19, 1), (2, 3), (17, 3), (3, 2), (3, 7)];
        let images: Vec<BatchImage> = counts
            .iter()
            .enumerate()
            .map(|(i, &(h, d))| item(&format!("tree_{}.png", i + 1), png([h, d, 0])))
            .collect();

        let outcome = process_batch(&analyzer, &session, "apple", &images, 3, &AbortHandle::new()).unwrap();
        assert!(outcome.errors.is_empty());
        let scores: Vec<f64> = outcome.records.iter().map(|r| r.health_score).collect();
        assert_eq!(scores, vec![95.0, 40.0, 85.0, 60.0, 30.0]);

        let config = RenderConfig {
            farm_map_width: 200,
            farm_map_height: 150,
            ..RenderConfig::default()
        };
        let report = FarmReport::generate(&session.snapshot().unwrap(), registry.crop("apple").ok(), &config);
        let summary = report.farm_summary;
        assert_eq!(summary.total_trees, 5);
        assert!((summary.average_health_score - 62.0).abs() < 1e-9);
        assert_eq!(summary.healthy_trees, 2);
        assert_eq!(summary.diseased_trees, 3);
        assert!((summary.health_percentage - 40.0).abs() < 1e-9);
        assert_eq!(report.disease_distribution.get("black_rot"), 16);
        assert_eq!(report.disease_distribution.get("healthy"), 44);
        assert!(report.visualizations.health_map.is_some());
    }

    #[test]
    fn test_dead_ingest_worker_reports_poisoned_session() {
        let result = thread::scope(|scope| {
            let worker = scope.spawn(|| -> Vec<TreeRecord> { panic!("ingest worker died") });
            join_ingest_worker(worker)
        });
        assert!(matches!(result, Err(ScanError::SessionPoisoned)));

        let ok = thread::scope(|scope| join_ingest_worker(scope.spawn(Vec::new)));
        assert!(ok.unwrap().is_empty());
    }
}
