//! Disease signature registry.
//!
//! A signature describes how one disease shows up on one crop: HSV color
//! ranges (OpenCV scale, H 0-180, S/V 0-255), a minimum region size and the
//! confidence a scored region must reach. The registry is validated when it
//! is built and never mutated afterwards.

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Largest hue value on the OpenCV HSV scale.
pub const MAX_HUE: u8 = 180;

/// Inclusive HSV bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    /// True if every channel lies within `[lower, upper]`.
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.lower[c] && hsv[c] <= self.upper[c])
    }

    /// True if every channel lies strictly inside `(lower, upper)`.
    pub fn strictly_contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] > self.lower[c] && hsv[c] < self.upper[c])
    }
}

/// One registered disease definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiseaseSignature {
    pub crop: String,
    pub disease_label: String,
    pub color_ranges: Vec<HsvRange>,
    /// Minimum connected-region size in pixels
    pub min_region_area: u32,
    /// Minimum combined confidence in [0, 1]
    pub confidence_threshold: f64,
    pub description: String,
    /// Treatment hint appended to recommendations
    #[serde(default)]
    pub treatment: String,
    /// Marks the crop's "no disease" signature
    #[serde(default)]
    pub healthy: bool,
}

/// All signatures for one crop, in evaluation order (healthy last).
#[derive(Debug, Clone)]
pub struct CropSignatures {
    crop: String,
    signatures: Vec<DiseaseSignature>,
}

impl CropSignatures {
    pub fn crop(&self) -> &str {
        &self.crop
    }

    /// Signatures in evaluation order: diseases first, then the healthy one.
    pub fn signatures(&self) -> &[DiseaseSignature] {
        &self.signatures
    }

    pub fn get(&self, label: &str) -> Option<&DiseaseSignature> {
        self.signatures.iter().find(|s| s.disease_label == label)
    }

    /// Label of the designated healthy signature, if the crop has one.
    pub fn healthy_label(&self) -> Option<&str> {
        self.signatures
            .iter()
            .find(|s| s.healthy)
            .map(|s| s.disease_label.as_str())
    }

    pub fn is_healthy(&self, label: &str) -> bool {
        self.healthy_label() == Some(label)
    }

    /// Treatment text for a label, if one was registered.
    pub fn treatment(&self, label: &str) -> Option<&str> {
        self.get(label)
            .map(|s| s.treatment.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Immutable, validated registry keyed by `(crop, disease_label)`.
#[derive(Debug, Clone)]
pub struct SignatureRegistry {
    crops: BTreeMap<String, CropSignatures>,
}

impl SignatureRegistry {
    /// Builds a registry, validating every signature.
    pub fn new(signatures: Vec<DiseaseSignature>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut grouped: BTreeMap<String, Vec<DiseaseSignature>> = BTreeMap::new();

        for signature in signatures {
            validate_signature(&signature)?;
            let key = (signature.crop.clone(), signature.disease_label.clone());
            if !seen.insert(key) {
                return Err(invalid(&signature, "duplicate (crop, label) key"));
            }
            grouped
                .entry(signature.crop.clone())
                .or_default()
                .push(signature);
        }

        let mut crops = BTreeMap::new();
        for (crop, mut signatures) in grouped {
            let healthy_count = signatures.iter().filter(|s| s.healthy).count();
            if healthy_count > 1 {
                return Err(ScanError::InvalidSignature {
                    crop,
                    label: "*".to_string(),
                    reason: format!("{} healthy signatures, at most one allowed", healthy_count),
                });
            }
            // Stable: diseases keep their definition order, healthy goes last.
            signatures.sort_by_key(|s| s.healthy);
            crops.insert(crop.clone(), CropSignatures { crop, signatures });
        }

        Ok(Self { crops })
    }

    /// Parses and validates a JSON array of signatures.
    pub fn from_json(json: &str) -> Result<Self> {
        let signatures: Vec<DiseaseSignature> = serde_json::from_str(json)?;
        Self::new(signatures)
    }

    /// Loads a registry from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&content)?;
        crate::log(&format!(
            "Loaded {} signatures for {} crops from {}",
            registry.len(),
            registry.crops.len(),
            path.display()
        ));
        Ok(registry)
    }

    /// The built-in apple and soybean signatures.
    pub fn builtin() -> Self {
        // The built-in table is static and covered by tests.
        Self::new(builtin_signatures()).expect("built-in signatures are valid")
    }

    /// Signatures for one crop, or `UnknownCropType`.
    pub fn crop(&self, crop: &str) -> Result<&CropSignatures> {
        self.crops
            .get(crop)
            .ok_or_else(|| ScanError::UnknownCropType(crop.to_string()))
    }

    pub fn get(&self, crop: &str, label: &str) -> Option<&DiseaseSignature> {
        self.crops.get(crop).and_then(|c| c.get(label))
    }

    pub fn crop_names(&self) -> impl Iterator<Item = &str> {
        self.crops.keys().map(|k| k.as_str())
    }

    /// Total number of signatures across all crops.
    pub fn len(&self) -> usize {
        self.crops.values().map(|c| c.signatures.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.crops.is_empty()
    }
}

fn invalid(signature: &DiseaseSignature, reason: &str) -> ScanError {
    ScanError::InvalidSignature {
        crop: signature.crop.clone(),
        label: signature.disease_label.clone(),
        reason: reason.to_string(),
    }
}

fn validate_signature(signature: &DiseaseSignature) -> Result<()> {
    if signature.crop.trim().is_empty() {
        return Err(invalid(signature, "empty crop name"));
    }
    if signature.disease_label.trim().is_empty() {
        return Err(invalid(signature, "empty disease label"));
    }
    if signature
        .disease_label
        .chars()
        .any(|c| matches!(c, ',' | ';' | '"' | '\n' | '\r'))
    {
        return Err(invalid(signature, "label contains a reserved character"));
    }
    if signature.color_ranges.is_empty() {
        return Err(invalid(signature, "no color ranges"));
    }
    for range in &signature.color_ranges {
        if (0..3).any(|c| range.lower[c] > range.upper[c]) {
            return Err(invalid(signature, "color range lower bound exceeds upper bound"));
        }
        if range.upper[0] > MAX_HUE {
            return Err(invalid(signature, "hue bound above 180"));
        }
    }
    if !(0.0..=1.0).contains(&signature.confidence_threshold) {
        return Err(invalid(signature, "confidence threshold outside [0, 1]"));
    }
    if signature.min_region_area == 0 {
        return Err(invalid(signature, "minimum region area must be at least 1 pixel"));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn signature(
    crop: &str,
    label: &str,
    color_ranges: &[HsvRange],
    min_region_area: u32,
    confidence_threshold: f64,
    description: &str,
    treatment: &str,
    healthy: bool,
) -> DiseaseSignature {
    DiseaseSignature {
        crop: crop.to_string(),
        disease_label: label.to_string(),
        color_ranges: color_ranges.to_vec(),
        min_region_area,
        confidence_threshold,
        description: description.to_string(),
        treatment: treatment.to_string(),
        healthy,
    }
}

const HEALTHY_GREEN: HsvRange = HsvRange::new([35, 40, 40], [85, 255, 255]);
const POWDERY_WHITE: HsvRange = HsvRange::new([0, 0, 150], [180, 80, 255]);

fn builtin_signatures() -> Vec<DiseaseSignature> {
    vec![
        signature(
            "apple",
            "apple_scab",
            &[HsvRange::new([20, 40, 20], [40, 255, 100])],
            100,
            0.3,
            "Dark olive-green to brown lesions",
            "Apply fungicide (Captan or Myclobutanil)",
            false,
        ),
        signature(
            "apple",
            "black_rot",
            &[
                HsvRange::new([0, 0, 0], [180, 255, 50]),
                HsvRange::new([10, 100, 20], [30, 255, 80]),
            ],
            150,
            0.4,
            "Circular black/brown spots with concentric rings",
            "Remove infected fruit, apply fungicide",
            false,
        ),
        signature(
            "apple",
            "cedar_apple_rust",
            &[
                HsvRange::new([0, 100, 100], [20, 255, 255]),
                HsvRange::new([160, 100, 100], [180, 255, 255]),
            ],
            80,
            0.25,
            "Orange-rust colored circular lesions",
            "Remove nearby cedar trees, apply fungicide",
            false,
        ),
        signature(
            "apple",
            "powdery_mildew",
            &[POWDERY_WHITE],
            120,
            0.2,
            "White powdery coating on leaves",
            "Improve air circulation, apply sulfur-based fungicide",
            false,
        ),
        signature(
            "apple",
            "healthy",
            &[HEALTHY_GREEN],
            500,
            0.15,
            "Uniform green coloration",
            "",
            true,
        ),
        signature(
            "soybean",
            "bacterial_blight",
            &[HsvRange::new([10, 80, 20], [30, 255, 120])],
            80,
            0.3,
            "Angular dark brown lesions with yellow halos",
            "Rotate crops, use resistant varieties, apply copper bactericide",
            false,
        ),
        signature(
            "soybean",
            "downy_mildew",
            &[HsvRange::new([25, 40, 120], [35, 150, 255])],
            100,
            0.25,
            "Pale yellow-green blotches on upper leaf surface",
            "Use treated seed, improve field drainage",
            false,
        ),
        signature(
            "soybean",
            "mosaic_virus",
            &[HsvRange::new([30, 60, 150], [40, 200, 255])],
            150,
            0.3,
            "Mottled light and dark green mosaic pattern",
            "Control aphid vectors, remove infected plants",
            false,
        ),
        signature(
            "soybean",
            "powdery_mildew",
            &[POWDERY_WHITE],
            120,
            0.2,
            "White powdery coating on leaves",
            "Apply sulfur-based fungicide",
            false,
        ),
        signature(
            "soybean",
            "rust",
            &[HsvRange::new([5, 100, 60], [20, 255, 200])],
            60,
            0.3,
            "Tan to reddish-brown pustules on leaf underside",
            "Apply triazole or strobilurin fungicide",
            false,
        ),
        signature(
            "soybean",
            "healthy",
            &[HEALTHY_GREEN],
            500,
            0.15,
            "Uniform green coloration",
            "",
            true,
        ),
    ]
}
