//! Classical disease-region detection.
//!
//! This module provides:
//! - The disease signature registry
//! - HSV preprocessing and mask cleanup
//! - Connected-region candidate extraction
//! - Texture / color / shape scoring
//! - Threshold filtering and severity bucketing
//! - The `DiseaseDetector` capability shared by all detector backends

pub mod extract;
pub mod features;
pub mod preprocess;
pub mod severity;
pub mod signatures;

pub use severity::SeverityBucket;
pub use signatures::{CropSignatures, DiseaseSignature, HsvRange, SignatureRegistry};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::DetectionConfig;
use crate::error::Result;
use extract::extract_candidates;
use features::score_region;
use preprocess::PreparedImage;
use severity::filter_region;

/// Integer pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

/// Axis-aligned pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One scored, labeled disease (or healthy) region. Read-only once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// 1-based id, unique within one image
    pub region_id: u32,
    pub crop: String,
    pub disease_label: String,
    /// Combined confidence in [0, 1]
    pub confidence: f64,
    pub severity: SeverityBucket,
    /// Region size in pixels
    pub area_px: u32,
    pub bbox: BoundingBox,
    /// Outer contour in image coordinates
    pub boundary: Vec<PixelPoint>,
}

impl Detection {
    pub fn is_healthy(&self) -> bool {
        self.severity.is_healthy()
    }
}

/// Capability shared by every detector backend, classical or learned.
pub trait DiseaseDetector: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Detects disease regions for `crop` in a decoded image.
    ///
    /// Fails with `UnknownCropType` if the backend knows nothing about the crop.
    fn detect(&self, image: &RgbImage, crop: &str) -> Result<Vec<Detection>>;
}

/// Color/texture/shape detector driven by the signature registry.
#[derive(Debug, Clone)]
pub struct ClassicalDetector {
    registry: Arc<SignatureRegistry>,
    config: DetectionConfig,
}

impl ClassicalDetector {
    pub fn new(registry: Arc<SignatureRegistry>, config: DetectionConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &SignatureRegistry {
        &self.registry
    }
}

impl DiseaseDetector for ClassicalDetector {
    fn name(&self) -> &str {
        "classical"
    }

    fn detect(&self, image: &RgbImage, crop: &str) -> Result<Vec<Detection>> {
        let crop_signatures = self.registry.crop(crop)?;
        let prepared = PreparedImage::new(image);

        let mut detections = Vec::new();
        let mut next_id = 1u32;

        for signature in crop_signatures.signatures() {
            let candidates = extract_candidates(&prepared, signature, self.config.morph_radius);
            let candidate_count = candidates.len();
            let mut kept = 0usize;

            for region in candidates {
                // Degenerate geometry: drop the region and move on.
                let Some(scores) = score_region(&prepared, &region, signature) else {
                    continue;
                };
                if let Some(detection) = filter_region(region, &scores, signature, next_id) {
                    next_id += 1;
                    kept += 1;
                    detections.push(detection);
                }
            }

            if candidate_count > 0 {
                crate::log(&format!(
                    "{}/{}: {} candidates, {} kept",
                    crop, signature.disease_label, candidate_count, kept
                ));
            }
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use image::{ImageBuffer, Rgb};

    fn detector() -> ClassicalDetector {
        ClassicalDetector::new(Arc::new(SignatureRegistry::builtin()), DetectionConfig::default())
    }

    /// Green leaf with one dark-brown, mottled, roughly circular lesion.
    fn leaf_with_lesion(width: u32, height: u32, cx: f32, cy: f32, radius: f32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            if dx * dx + dy * dy <= radius * radius {
                // speckle so texture is non-trivial
                if (x + y) % 3 == 0 {
                    Rgb([45, 22, 8])
                } else {
                    Rgb([60, 30, 10])
                }
            } else {
                Rgb([40, 160, 40])
            }
        })
    }

    #[test]
    fn test_unknown_crop_fails() {
        let img: RgbImage = ImageBuffer::from_pixel(10, 10, Rgb([40, 160, 40]));
        assert!(matches!(
            detector().detect(&img, "mango"),
            Err(ScanError::UnknownCropType(_))
        ));
    }

    #[test]
    fn test_blank_image_has_no_detections() {
        // Mid-gray matches no apple signature
        let img: RgbImage = ImageBuffer::from_pixel(64, 64, Rgb([128, 128, 128]));
        let detections = detector().detect(&img, "apple").unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_healthy_leaf_detected_as_healthy() {
        let img: RgbImage = ImageBuffer::from_pixel(64, 64, Rgb([40, 160, 40]));
        let detections = detector().detect(&img, "apple").unwrap();
        assert!(!detections.is_empty());
        assert!(detections.iter().all(|d| d.is_healthy()));
        assert!(detections.iter().all(|d| d.disease_label == "healthy"));
    }

    #[test]
    fn test_dark_lesion_detected() {
        let img = leaf_with_lesion(120, 120, 60.0, 60.0, 15.0);
        let detections = detector().detect(&img, "apple").unwrap();

        let rot: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.disease_label == "black_rot")
            .collect();
        assert_eq!(rot.len(), 1);
        assert!(!rot[0].is_healthy());
        assert!(rot[0].area_px >= 150);
        assert!((0.0..=1.0).contains(&rot[0].confidence));

        // region ids are unique and sequential
        let ids: Vec<u32> = detections.iter().map(|d| d.region_id).collect();
        let expected: Vec<u32> = (1..=detections.len() as u32).collect();
        assert_eq!(ids, expected);
    }
}
