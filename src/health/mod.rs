//! Per-image health pipeline.
//!
//! Detector → normalization → report aggregation → overlays. Any
//! `DiseaseDetector` backend can sit at the front; its output is normalized
//! once here so every report has the same shape.

pub mod fonts;
pub mod render;
pub mod report;

pub use report::{DamageStats, DiseaseCounts, HealthStatus, ImageHealthReport};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{RenderConfig, ScanConfig};
use crate::detection::{
    ClassicalDetector, CropSignatures, Detection, DiseaseDetector, SeverityBucket, SignatureRegistry,
};
use crate::error::{Result, ScanError};

/// Base64 PNG overlays for one image; `None` for layers that do not apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageVisualizations {
    pub health_map: Option<String>,
    pub contour_map: Option<String>,
}

/// Report plus overlays for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAnalysis {
    #[serde(flatten)]
    pub report: ImageHealthReport,
    pub visualizations: ImageVisualizations,
}

/// Runs the per-image pipeline. Stateless and shareable across worker threads.
#[derive(Clone)]
pub struct HealthAnalyzer {
    detector: Arc<dyn DiseaseDetector>,
    registry: Arc<SignatureRegistry>,
    render: RenderConfig,
}

impl HealthAnalyzer {
    pub fn new(
        detector: Arc<dyn DiseaseDetector>,
        registry: Arc<SignatureRegistry>,
        render: RenderConfig,
    ) -> Self {
        Self {
            detector,
            registry,
            render,
        }
    }

    /// Analyzer backed by the classical detector.
    pub fn classical(registry: Arc<SignatureRegistry>, config: &ScanConfig) -> Self {
        let detector = ClassicalDetector::new(Arc::clone(&registry), config.detection.clone());
        Self::new(Arc::new(detector), registry, config.render.clone())
    }

    pub fn registry(&self) -> &SignatureRegistry {
        &self.registry
    }

    /// Detects, normalizes and aggregates without rendering overlays.
    pub fn report(&self, image: &RgbImage, crop: &str) -> Result<ImageHealthReport> {
        let signatures = self.registry.crop(crop)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(ScanError::InvalidImage("image has no pixels".to_string()));
        }

        let raw = self.detector.detect(image, crop)?;
        let detections = normalize_detections(raw, signatures);
        crate::log(&format!(
            "{} detector: {} detections for {} ({}x{})",
            self.detector.name(),
            detections.len(),
            crop,
            image.width(),
            image.height()
        ));

        Ok(ImageHealthReport::from_detections(
            crop,
            detections,
            image.dimensions(),
            Some(signatures),
        ))
    }

    /// Full pipeline for a decoded image: report and overlays.
    pub fn analyze(&self, image: &RgbImage, crop: &str) -> Result<ImageAnalysis> {
        let report = self.report(image, crop)?;
        let visualizations = self.visualize(image, &report);
        Ok(ImageAnalysis {
            report,
            visualizations,
        })
    }

    /// Decodes encoded image bytes and runs the full pipeline.
    pub fn analyze_bytes(&self, bytes: &[u8], crop: &str) -> Result<ImageAnalysis> {
        let image = decode_image(bytes)?;
        self.analyze(&image, crop)
    }

    /// Renders both overlays for an existing report.
    pub fn visualize(&self, image: &RgbImage, report: &ImageHealthReport) -> ImageVisualizations {
        let (health_map, contour_map) = self.render_layers(image, report);
        ImageVisualizations {
            health_map: render::encode_layer("health map", health_map),
            contour_map: render::encode_layer("contour map", contour_map),
        }
    }

    /// Renders both overlays as images. A layer with nothing to show is `None`.
    pub fn render_layers(
        &self,
        image: &RgbImage,
        report: &ImageHealthReport,
    ) -> (Option<RgbImage>, Option<RgbImage>) {
        let health_map = Some(render::draw_health_map(image, &report.detections, &self.render));
        let damage = report
            .damaged_area_stats
            .map(|d| d.damage_percentage)
            .unwrap_or(0.0);
        let contour_map = render::draw_contour_map(image, &report.detections, damage, &self.render);
        (health_map, contour_map)
    }
}

/// Decodes image bytes into RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| ScanError::InvalidImage(e.to_string()))?
        .to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(ScanError::InvalidImage("image has no pixels".to_string()));
    }
    Ok(image)
}

/// Brings any backend's detections into canonical form.
///
/// Confidence is clamped into [0, 1] (NaN becomes 0), severity is re-derived
/// from the crop's healthy designation and region ids are renumbered 1.. in
/// emission order.
pub fn normalize_detections(detections: Vec<Detection>, signatures: &CropSignatures) -> Vec<Detection> {
    detections
        .into_iter()
        .enumerate()
        .map(|(i, mut d)| {
            d.confidence = if d.confidence.is_nan() {
                0.0
            } else {
                d.confidence.clamp(0.0, 1.0)
            };
            d.severity = SeverityBucket::classify(d.confidence, signatures.is_healthy(&d.disease_label));
            d.region_id = i as u32 + 1;
            d
        })
        .collect()
}
