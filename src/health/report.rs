//! Per-image health aggregation.
//!
//! Reduces the detections of one image into an `ImageHealthReport`: health
//! percentage, status bucket, per-disease counts, damage statistics and
//! recommendations.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::detection::{CropSignatures, Detection};

/// Treatment text used when the registry has none for a label.
pub const GENERIC_TREATMENT: &str = "consult an agronomist for treatment options";

/// Health tier of an image or tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    /// Buckets a health percentage (lower bounds inclusive).
    pub fn from_health(health: f64) -> Self {
        if health >= 90.0 {
            HealthStatus::Excellent
        } else if health >= 75.0 {
            HealthStatus::Good
        } else if health >= 50.0 {
            HealthStatus::Fair
        } else if health >= 25.0 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        }
    }

    /// Excellent and Good count as healthy trees on the farm report.
    pub fn is_healthy(self) -> bool {
        matches!(self, HealthStatus::Excellent | HealthStatus::Good)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Excellent => "Excellent",
            HealthStatus::Good => "Good",
            HealthStatus::Fair => "Fair",
            HealthStatus::Poor => "Poor",
            HealthStatus::Critical => "Critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Excellent" => Some(HealthStatus::Excellent),
            "Good" => Some(HealthStatus::Good),
            "Fair" => Some(HealthStatus::Fair),
            "Poor" => Some(HealthStatus::Poor),
            "Critical" => Some(HealthStatus::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label counts kept in first-seen order.
///
/// Serialized as a JSON object whose keys appear in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiseaseCounts {
    entries: Vec<(String, u32)>,
}

impl DiseaseCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` to a label, appending it if unseen.
    pub fn add(&mut self, label: &str, n: u32) {
        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += n,
            None => self.entries.push((label.to_string(), n)),
        }
    }

    pub fn increment(&mut self, label: &str) {
        self.add(label, 1);
    }

    /// Element-wise sum; new labels are appended in `other`'s order.
    pub fn merge(&mut self, other: &DiseaseCounts) {
        for (label, count) in other.iter() {
            self.add(label, count);
        }
    }

    pub fn get(&self, label: &str) -> u32 {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(l, c)| (l.as_str(), *c))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn total(&self) -> u32 {
        self.entries.iter().map(|(_, c)| *c).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Serialize for DiseaseCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, count) in &self.entries {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DiseaseCounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = DiseaseCounts;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of disease label to count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut counts = DiseaseCounts::new();
                while let Some((label, count)) = access.next_entry::<String, u32>()? {
                    counts.add(&label, count);
                }
                Ok(counts)
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}

/// Damage statistics of one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageStats {
    pub total_damaged_areas: u32,
    pub damage_percentage: f64,
}

/// Canonical per-image report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageHealthReport {
    pub crop_type: String,
    pub overall_health: f64,
    pub status: HealthStatus,
    pub disease_summary: DiseaseCounts,
    pub total_detections: u32,
    pub damaged_area_stats: Option<DamageStats>,
    pub recommendations: Vec<String>,
    pub advisories: Vec<String>,
    /// Detections the report was built from (not part of the JSON shape)
    #[serde(skip)]
    pub detections: Vec<Detection>,
}

impl ImageHealthReport {
    /// Aggregates the detections of one `width` x `height` image.
    ///
    /// Healthiness comes from each detection's severity bucket; `signatures`
    /// supplies treatment text and the healthy label to leave out of the
    /// recommendations.
    pub fn from_detections(
        crop_type: &str,
        detections: Vec<Detection>,
        (width, height): (u32, u32),
        signatures: Option<&CropSignatures>,
    ) -> Self {
        let mut disease_summary = DiseaseCounts::new();
        for detection in &detections {
            disease_summary.increment(&detection.disease_label);
        }

        let total = detections.len() as u32;
        let healthy = detections.iter().filter(|d| d.is_healthy()).count() as u32;
        let overall_health = overall_health(healthy, total);

        let damaged: Vec<&Detection> = detections.iter().filter(|d| !d.is_healthy()).collect();
        let damaged_area_stats = if damaged.is_empty() {
            None
        } else {
            let damaged_px: u64 = damaged.iter().map(|d| d.area_px as u64).sum();
            Some(DamageStats {
                total_damaged_areas: damaged.len() as u32,
                damage_percentage: damage_percentage(damaged_px, width, height),
            })
        };

        let recommendations = recommendations(&disease_summary, signatures);
        let advisories = advisories(overall_health, damaged_area_stats.as_ref(), recommendations.is_empty());

        Self {
            crop_type: crop_type.to_string(),
            overall_health,
            status: HealthStatus::from_health(overall_health),
            disease_summary,
            total_detections: total,
            damaged_area_stats,
            recommendations,
            advisories,
            detections,
        }
    }

    /// Labels in the summary other than the crop's healthy label.
    pub fn disease_labels(&self, signatures: Option<&CropSignatures>) -> Vec<String> {
        self.disease_summary
            .labels()
            .filter(|label| !is_healthy_label(label, signatures))
            .map(str::to_string)
            .collect()
    }
}

/// `100 · healthy / total`, one decimal; 100 when nothing was detected.
pub fn overall_health(healthy: u32, total: u32) -> f64 {
    if total == 0 {
        return 100.0;
    }
    round_to(100.0 * healthy as f64 / total as f64, 1)
}

/// Share of the image covered by damaged pixels, clamped to 100.
///
/// Overlapping signatures can count one pixel twice, hence the clamp.
pub fn damage_percentage(damaged_px: u64, width: u32, height: u32) -> f64 {
    let total_px = width as u64 * height as u64;
    if total_px == 0 {
        return 0.0;
    }
    round_to(100.0 * damaged_px as f64 / total_px as f64, 2).min(100.0)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub(crate) fn is_healthy_label(label: &str, signatures: Option<&CropSignatures>) -> bool {
    match signatures {
        Some(sigs) => sigs.is_healthy(label),
        None => label == "healthy",
    }
}

/// One templated line per disease label, most frequent first.
///
/// Ties keep first-seen order. The healthy label never gets a line.
pub fn recommendations(counts: &DiseaseCounts, signatures: Option<&CropSignatures>) -> Vec<String> {
    let mut diseases: Vec<(&str, u32)> = counts
        .iter()
        .filter(|(label, count)| *count > 0 && !is_healthy_label(label, signatures))
        .collect();
    // sort_by is stable
    diseases.sort_by(|a, b| b.1.cmp(&a.1));

    diseases
        .into_iter()
        .map(|(label, count)| {
            let treatment = signatures
                .and_then(|s| s.treatment(label))
                .unwrap_or(GENERIC_TREATMENT);
            format!("Detected {} instance(s) of {} - {}", count, label, treatment)
        })
        .collect()
}

fn advisories(overall_health: f64, damage: Option<&DamageStats>, no_recommendations: bool) -> Vec<String> {
    let mut advisories = Vec::new();

    if overall_health < 50.0 {
        advisories.push("Urgent: overall health is low, immediate intervention required".to_string());
    }
    if let Some(damage) = damage {
        if damage.damage_percentage > 30.0 {
            advisories.push(format!(
                "High damage level ({:.1}%) - prioritize treatment of affected areas",
                damage.damage_percentage
            ));
        }
        if damage.total_damaged_areas > 10 {
            advisories.push(format!(
                "{} damaged areas found - consider zone-based treatment",
                damage.total_damaged_areas
            ));
        }
    }
    if advisories.is_empty() && no_recommendations {
        advisories.push("Crop appears healthy - maintain current practices".to_string());
    }

    advisories
}
