//! Feature scoring for candidate regions.
//!
//! Three independent scores in [0, 1] are combined into a confidence:
//! `0.4 * texture + 0.3 * color + 0.3 * shape`.

use imageproc::geometry::arc_length;
use imageproc::point::Point;

use super::extract::CandidateRegion;
use super::preprocess::PreparedImage;
use super::signatures::DiseaseSignature;
use super::PixelPoint;

pub const TEXTURE_WEIGHT: f64 = 0.4;
pub const COLOR_WEIGHT: f64 = 0.3;
pub const SHAPE_WEIGHT: f64 = 0.3;

/// Intensity standard deviation that maps to a full roughness score.
const STD_DEV_SCALE: f64 = 50.0;
/// Mean Sobel magnitude that maps to a full edge score.
const GRADIENT_SCALE: f64 = 255.0;
/// Variance of the 3x3 local range that maps to a full score.
const LOCAL_RANGE_VAR_SCALE: f64 = 1024.0;
/// Entropy of a uniform 256-bin histogram.
const MAX_ENTROPY_BITS: f64 = 8.0;

/// Texture sub-measures over a region's pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureFeatures {
    pub std_dev: f64,
    pub gradient: f64,
    pub local_range_var: f64,
    pub entropy: f64,
}

impl TextureFeatures {
    /// Normalizes each sub-measure into [0, 1] and averages them.
    pub fn score(&self) -> f64 {
        let parts = [
            (self.std_dev / STD_DEV_SCALE).clamp(0.0, 1.0),
            (self.gradient / GRADIENT_SCALE).clamp(0.0, 1.0),
            (self.local_range_var / LOCAL_RANGE_VAR_SCALE).clamp(0.0, 1.0),
            (self.entropy / MAX_ENTROPY_BITS).clamp(0.0, 1.0),
        ];
        parts.iter().sum::<f64>() / parts.len() as f64
    }
}

/// All scores computed for one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionScores {
    pub texture: TextureFeatures,
    pub texture_score: f64,
    pub color_score: f64,
    pub shape_score: f64,
    pub circularity: f64,
    pub confidence: f64,
}

/// Weighted combination of the three scores, clamped to [0, 1].
pub fn combine_scores(texture_score: f64, color_score: f64, shape_score: f64) -> f64 {
    (TEXTURE_WEIGHT * texture_score + COLOR_WEIGHT * color_score + SHAPE_WEIGHT * shape_score)
        .clamp(0.0, 1.0)
}

/// Scores one region, or `None` when its geometry is degenerate.
pub fn score_region(
    prepared: &PreparedImage,
    region: &CandidateRegion,
    signature: &DiseaseSignature,
) -> Option<RegionScores> {
    let texture = texture_features(prepared, region)?;
    let color_score = color_score(prepared, region, signature)?;
    let circularity = circularity(&region.boundary)?;

    let texture_score = texture.score();
    let shape_score = circularity.clamp(0.0, 1.0);

    Some(RegionScores {
        texture,
        texture_score,
        color_score,
        shape_score,
        circularity,
        confidence: combine_scores(texture_score, color_score, shape_score),
    })
}

/// Computes texture sub-measures from the shared per-image planes.
pub fn texture_features(prepared: &PreparedImage, region: &CandidateRegion) -> Option<TextureFeatures> {
    let mut histogram = [0u32; 256];
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut gradient_sum = 0.0;
    let mut range_sum = 0.0;
    let mut range_sum_sq = 0.0;
    let mut n = 0u32;

    for (x, y) in region.pixels() {
        let v = prepared.gray.get_pixel(x, y)[0];
        histogram[v as usize] += 1;
        sum += v as f64;
        sum_sq += (v as f64) * (v as f64);
        gradient_sum += prepared.gradient.get_pixel(x, y)[0] as f64;
        let r = prepared.local_range.get_pixel(x, y)[0] as f64;
        range_sum += r;
        range_sum_sq += r * r;
        n += 1;
    }

    if n == 0 {
        return None;
    }
    let n_f = n as f64;

    let mean = sum / n_f;
    let variance = (sum_sq / n_f - mean * mean).max(0.0);
    let range_mean = range_sum / n_f;
    let range_var = (range_sum_sq / n_f - range_mean * range_mean).max(0.0);

    let entropy = histogram
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n_f;
            -p * p.log2()
        })
        .sum::<f64>();

    Some(TextureFeatures {
        std_dev: variance.sqrt(),
        gradient: gradient_sum / n_f,
        local_range_var: range_var,
        entropy,
    })
}

/// Fraction of region pixels strictly inside one of the signature's ranges.
pub fn color_score(
    prepared: &PreparedImage,
    region: &CandidateRegion,
    signature: &DiseaseSignature,
) -> Option<f64> {
    let mut total = 0u32;
    let mut matched = 0u32;
    for (x, y) in region.pixels() {
        let hsv = prepared.hsv.get_pixel(x, y).0;
        total += 1;
        if signature
            .color_ranges
            .iter()
            .any(|range| range.strictly_contains(hsv))
        {
            matched += 1;
        }
    }
    if total == 0 {
        return None;
    }
    Some(matched as f64 / total as f64)
}

/// `4π·area / perimeter²` of a closed boundary; `None` for zero perimeter.
pub fn circularity(boundary: &[PixelPoint]) -> Option<f64> {
    let perimeter = perimeter(boundary);
    if perimeter <= 0.0 {
        return None;
    }
    let area = polygon_area(boundary);
    Some(4.0 * std::f64::consts::PI * area / (perimeter * perimeter))
}

/// Closed arc length of a boundary.
pub fn perimeter(boundary: &[PixelPoint]) -> f64 {
    let points: Vec<Point<i32>> = boundary.iter().map(|p| Point::new(p.x, p.y)).collect();
    arc_length(&points, true)
}

/// Shoelace area of a closed polygon (absolute value).
pub fn polygon_area(boundary: &[PixelPoint]) -> f64 {
    if boundary.len() < 3 {
        return 0.0;
    }
    let twice_area: i64 = boundary
        .iter()
        .zip(boundary.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice_area.abs() as f64 / 2.0
}
