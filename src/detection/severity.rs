//! Detection filter and severity bucketing.

use serde::{Deserialize, Serialize};

use super::extract::CandidateRegion;
use super::features::RegionScores;
use super::signatures::DiseaseSignature;
use super::Detection;

/// Confidence below this is `Mild`.
pub const MODERATE_BREAKPOINT: f64 = 0.60;
/// Confidence at or above this is `Severe`.
pub const SEVERE_BREAKPOINT: f64 = 0.75;

/// Discrete health tier of one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeverityBucket {
    Healthy,
    Mild,
    Moderate,
    Severe,
}

impl SeverityBucket {
    /// Buckets a confidence; the healthy signature is always `Healthy`.
    pub fn classify(confidence: f64, healthy: bool) -> Self {
        if healthy {
            SeverityBucket::Healthy
        } else if confidence < MODERATE_BREAKPOINT {
            SeverityBucket::Mild
        } else if confidence < SEVERE_BREAKPOINT {
            SeverityBucket::Moderate
        } else {
            SeverityBucket::Severe
        }
    }

    pub fn is_healthy(self) -> bool {
        self == SeverityBucket::Healthy
    }
}

impl std::fmt::Display for SeverityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeverityBucket::Healthy => write!(f, "Healthy"),
            SeverityBucket::Mild => write!(f, "Mild"),
            SeverityBucket::Moderate => write!(f, "Moderate"),
            SeverityBucket::Severe => write!(f, "Severe"),
        }
    }
}

/// Keeps a scored region if it clears the signature's confidence threshold.
///
/// Rejection is silent: most regions are not disease.
pub fn filter_region(
    region: CandidateRegion,
    scores: &RegionScores,
    signature: &DiseaseSignature,
    region_id: u32,
) -> Option<Detection> {
    if region.area_px < signature.min_region_area {
        return None;
    }
    if scores.confidence < signature.confidence_threshold {
        return None;
    }

    Some(Detection {
        region_id,
        crop: signature.crop.clone(),
        disease_label: signature.disease_label.clone(),
        confidence: scores.confidence,
        severity: SeverityBucket::classify(scores.confidence, signature.healthy),
        area_px: region.area_px,
        bbox: region.bbox,
        boundary: region.boundary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::features::TextureFeatures;
    use crate::detection::signatures::HsvRange;
    use crate::detection::{BoundingBox, PixelPoint};
    use image::GrayImage;

    fn scores(confidence: f64) -> RegionScores {
        RegionScores {
            texture: TextureFeatures {
                std_dev: 0.0,
                gradient: 0.0,
                local_range_var: 0.0,
                entropy: 0.0,
            },
            texture_score: 0.0,
            color_score: 0.0,
            shape_score: 0.0,
            circularity: 0.0,
            confidence,
        }
    }

    fn region(area_px: u32) -> CandidateRegion {
        CandidateRegion {
            bbox: BoundingBox { x: 0, y: 0, width: 10, height: 10 },
            area_px,
            mask: GrayImage::new(10, 10),
            boundary: vec![PixelPoint { x: 0, y: 0 }],
        }
    }

    fn signature(threshold: f64, healthy: bool) -> DiseaseSignature {
        DiseaseSignature {
            crop: "apple".to_string(),
            disease_label: if healthy { "healthy" } else { "black_rot" }.to_string(),
            color_ranges: vec![HsvRange::new([0, 0, 0], [180, 255, 50])],
            min_region_area: 50,
            confidence_threshold: threshold,
            description: String::new(),
            treatment: String::new(),
            healthy,
        }
    }

    #[test]
    fn test_breakpoints() {
        assert_eq!(SeverityBucket::classify(0.0, false), SeverityBucket::Mild);
        assert_eq!(SeverityBucket::classify(0.5999, false), SeverityBucket::Mild);
        assert_eq!(SeverityBucket::classify(0.60, false), SeverityBucket::Moderate);
        assert_eq!(SeverityBucket::classify(0.7499, false), SeverityBucket::Moderate);
        assert_eq!(SeverityBucket::classify(0.75, false), SeverityBucket::Severe);
        assert_eq!(SeverityBucket::classify(1.0, false), SeverityBucket::Severe);
    }

    #[test]
    fn test_healthy_ignores_confidence() {
        assert_eq!(SeverityBucket::classify(0.99, true), SeverityBucket::Healthy);
        assert_eq!(SeverityBucket::classify(0.1, true), SeverityBucket::Healthy);
    }

    #[test]
    fn test_filter_threshold_inclusive() {
        let sig = signature(0.4, false);
        let kept = filter_region(region(100), &scores(0.4), &sig, 3).unwrap();
        assert_eq!(kept.region_id, 3);
        assert_eq!(kept.disease_label, "black_rot");
        assert_eq!(kept.severity, SeverityBucket::Mild);

        assert!(filter_region(region(100), &scores(0.39), &sig, 4).is_none());
    }

    #[test]
    fn test_filter_area() {
        let sig = signature(0.1, false);
        assert!(filter_region(region(49), &scores(0.9), &sig, 1).is_none());
    }

    #[test]
    fn test_filter_healthy_bucket() {
        let sig = signature(0.1, true);
        let kept = filter_region(region(100), &scores(0.9), &sig, 1).unwrap();
        assert_eq!(kept.severity, SeverityBucket::Healthy);
    }
}
