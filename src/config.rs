//! Scan configuration loaded from config.json.
//!
//! If the config file doesn't exist or can't be parsed, default values are
//! used. Every section is `#[serde(default)]`, so a partial file only
//! overrides the keys it names.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete scan configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Region extraction settings
    pub detection: DetectionConfig,
    /// Overlay and farm map styling
    pub render: RenderConfig,
    /// Batch processing
    pub batch: BatchConfig,
    /// Farm session defaults
    pub farm: FarmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Radius of the square close/open kernel applied to color masks (2 = 5x5)
    pub morph_radius: u8,
    /// Optional JSON file replacing the built-in signature registry
    pub signatures_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Fill opacity for healthy regions on the health map
    pub healthy_alpha: f32,
    /// Fill opacity for diseased regions on the health map
    pub disease_alpha: f32,
    /// Fill opacity for damaged contours on the contour map
    pub contour_alpha: f32,
    /// Contours smaller than this (px²) are not drawn on the contour map
    pub min_contour_area: f64,
    /// Colors (RGB values)
    pub colors: ColorConfig,
    /// Font size for region labels on the overlays
    pub label_font_size: u32,
    /// Font size for the damage percentage on the contour map
    pub annotation_font_size: u32,
    /// Farm-wide map width in pixels
    pub farm_map_width: u32,
    /// Farm-wide map height in pixels
    pub farm_map_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub healthy: [u8; 3],
    pub mild: [u8; 3],
    pub moderate: [u8; 3],
    pub severe: [u8; 3],
    pub contour_fill: [u8; 3],
    pub contour_outline: [u8; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of per-image worker threads
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    /// Crop scanned when the CLI is not told otherwise
    pub crop_type: String,
    /// Trees per row when synthesizing locations for images without one
    pub synthetic_row_length: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            morph_radius: 2,
            signatures_path: None,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            healthy_alpha: 0.2,
            disease_alpha: 0.4,
            contour_alpha: 0.3,
            min_contour_area: 100.0,
            colors: ColorConfig::default(),
            label_font_size: 14,
            annotation_font_size: 20,
            farm_map_width: 1200,
            farm_map_height: 800,
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            healthy: [0, 255, 0],
            mild: [255, 255, 0],
            moderate: [255, 165, 0],
            severe: [255, 0, 0],
            contour_fill: [255, 0, 0],
            contour_outline: [0, 0, 255],
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            crop_type: "apple".to_string(),
            synthetic_row_length: 10,
        }
    }
}

impl ScanConfig {
    /// Load config from file, or return defaults if file doesn't exist.
    pub fn load(config_path: &Path) -> Self {
        if config_path.exists() {
            match fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => {
                        crate::log(&format!("Loaded scan config from {}", config_path.display()));
                        return config;
                    }
                    Err(e) => {
                        crate::log(&format!(
                            "Failed to parse scan config: {}. Using defaults.",
                            e
                        ));
                    }
                },
                Err(e) => {
                    crate::log(&format!("Failed to read scan config: {}. Using defaults.", e));
                }
            }
        } else {
            crate::log(&format!(
                "{} not found. Using default config.",
                config_path.display()
            ));
        }
        Self::default()
    }

    /// Save default config to file (for reference).
    pub fn save_default(config_path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&Self::default())?;
        fs::write(config_path, json)?;
        Ok(())
    }
}
