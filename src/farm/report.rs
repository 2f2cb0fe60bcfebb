//! Farm report generation.
//!
//! Turns a session snapshot into the canonical `FarmReport`: summary
//! statistics, the disease distribution, farm-level recommendations and
//! advisories, farm-wide visualizations and the tree log itself.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::charts::{farm_contour_map, farm_health_map};
use super::session::{FarmSessionState, TreeRecord};
use crate::config::RenderConfig;
use crate::detection::CropSignatures;
use crate::health::report::recommendations;
use crate::health::{DiseaseCounts, HealthStatus};

/// Headline numbers over the tree log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FarmSummary {
    pub total_trees: u32,
    /// Trees whose status is Excellent or Good
    pub healthy_trees: u32,
    pub diseased_trees: u32,
    pub average_health_score: f64,
    pub health_percentage: f64,
}

impl FarmSummary {
    pub fn from_records(records: &[TreeRecord]) -> Self {
        Self::from_scores(records.iter().map(|r| (r.health_score, r.status)))
    }

    /// Summary over `(health_score, status)` pairs.
    pub fn from_scores(scores: impl IntoIterator<Item = (f64, HealthStatus)>) -> Self {
        let mut total = 0u32;
        let mut healthy = 0u32;
        let mut health_sum = 0.0;

        for (score, status) in scores {
            total += 1;
            health_sum += score;
            if status.is_healthy() {
                healthy += 1;
            }
        }

        if total == 0 {
            return Self {
                total_trees: 0,
                healthy_trees: 0,
                diseased_trees: 0,
                average_health_score: 0.0,
                health_percentage: 0.0,
            };
        }

        Self {
            total_trees: total,
            healthy_trees: healthy,
            diseased_trees: total - healthy,
            average_health_score: health_sum / total as f64,
            health_percentage: 100.0 * healthy as f64 / total as f64,
        }
    }

    /// Share of diseased trees in percent (0 for an empty farm).
    pub fn diseased_percentage(&self) -> f64 {
        if self.total_trees == 0 {
            0.0
        } else {
            100.0 * self.diseased_trees as f64 / self.total_trees as f64
        }
    }
}

/// Farm-wide base64 PNG visualizations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FarmVisualizations {
    pub health_map: Option<String>,
    pub contour_map: Option<String>,
}

/// Canonical farm report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmReport {
    pub mission_id: String,
    pub crop_type: String,
    pub generated_at: DateTime<Local>,
    pub farm_summary: FarmSummary,
    pub disease_distribution: DiseaseCounts,
    pub recommendations: Vec<String>,
    pub advisories: Vec<String>,
    pub visualizations: FarmVisualizations,
    pub tree_log: Vec<TreeRecord>,
}

impl FarmReport {
    /// Builds the report for a snapshot, rendering farm-wide maps.
    pub fn generate(
        state: &FarmSessionState,
        signatures: Option<&CropSignatures>,
        render: &RenderConfig,
    ) -> Self {
        let visualizations = FarmVisualizations {
            health_map: farm_health_map(&state.tree_log, render),
            contour_map: farm_contour_map(&state.tree_log, render),
        };
        Self::with_visualizations(state, signatures, visualizations)
    }

    /// Builds the report without rendering anything.
    pub fn without_maps(state: &FarmSessionState, signatures: Option<&CropSignatures>) -> Self {
        Self::with_visualizations(state, signatures, FarmVisualizations::default())
    }

    fn with_visualizations(
        state: &FarmSessionState,
        signatures: Option<&CropSignatures>,
        visualizations: FarmVisualizations,
    ) -> Self {
        let farm_summary = FarmSummary::from_records(&state.tree_log);
        let report = Self {
            mission_id: state.mission_id.clone(),
            crop_type: state.crop_type.clone(),
            generated_at: Local::now(),
            farm_summary,
            disease_distribution: state.disease_distribution.clone(),
            recommendations: recommendations(&state.disease_distribution, signatures),
            advisories: farm_advisories(&farm_summary),
            visualizations,
            tree_log: state.tree_log.clone(),
        };

        crate::log(&format!(
            "Farm report {}: {} trees, average health {:.1}",
            report.mission_id, farm_summary.total_trees, farm_summary.average_health_score
        ));
        report
    }
}

/// Farm-level advisory based on the share of diseased trees.
pub fn farm_advisories(summary: &FarmSummary) -> Vec<String> {
    if summary.total_trees == 0 {
        return vec!["No trees scanned yet".to_string()];
    }
    let diseased = summary.diseased_percentage();
    let advisory = if diseased > 50.0 {
        format!(
            "Urgent: {:.1}% of trees show disease - schedule farm-wide treatment",
            diseased
        )
    } else if diseased > 25.0 {
        format!(
            "Warning: {:.1}% of trees show disease - treat affected rows and increase monitoring",
            diseased
        )
    } else if diseased > 10.0 {
        format!(
            "Attention: {:.1}% of trees show disease - treat affected trees individually",
            diseased
        )
    } else {
        "Farm health is good - continue regular monitoring".to_string()
    };
    vec![advisory]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::SignatureRegistry;
    use crate::farm::{FarmSession, Location};
    use crate::health::ImageHealthReport;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn report_with(health: f64, counts: &[(&str, u32)]) -> ImageHealthReport {
        let mut summary = DiseaseCounts::new();
        for &(label, n) in counts {
            summary.add(label, n);
        }
        ImageHealthReport {
            crop_type: "apple".to_string(),
            overall_health: health,
            status: HealthStatus::from_health(health),
            total_detections: summary.total(),
            disease_summary: summary,
            damaged_area_stats: None,
            recommendations: Vec::new(),
            advisories: Vec::new(),
            detections: Vec::new(),
        }
    }

    #[test]
    fn test_five_image_scenario() {
        let session = FarmSession::new("apple", 10);
        for health in [95.0, 40.0, 85.0, 60.0, 30.0] {
            session.ingest(&report_with(health, &[]), None, None).unwrap();
        }
        let report = FarmReport::without_maps(&session.snapshot().unwrap(), None);

        let summary = report.farm_summary;
        assert_eq!(summary.total_trees, 5);
        assert!((summary.average_health_score - 62.0).abs() < 1e-9);
        assert_eq!(summary.healthy_trees, 2);
        assert_eq!(summary.diseased_trees, 3);
        assert!((summary.health_percentage - 40.0).abs() < 1e-9);
        assert!(report.advisories[0].starts_with("Urgent"));
    }

    #[test]
    fn test_empty_session_summary() {
        let session = FarmSession::new("apple", 10);
        let report = FarmReport::generate(&session.snapshot().unwrap(), None, &RenderConfig::default());
        assert_eq!(report.farm_summary.total_trees, 0);
        assert_eq!(report.farm_summary.average_health_score, 0.0);
        assert_eq!(report.farm_summary.health_percentage, 0.0);
        assert!(report.visualizations.health_map.is_none());
        assert!(report.visualizations.contour_map.is_none());
    }

    #[test]
    fn test_average_is_arithmetic_mean() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..25 {
            let n = rng.gen_range(1..40);
            let scores: Vec<f64> = (0..n).map(|_| (rng.gen_range(0.0..=100.0f64) * 10.0).round() / 10.0).collect();
            let summary = FarmSummary::from_scores(scores.iter().map(|&s| (s, HealthStatus::from_health(s))));

            let mean = scores.iter().sum::<f64>() / n as f64;
            assert!((summary.average_health_score - mean).abs() < 1e-9);
            assert_eq!(summary.healthy_trees + summary.diseased_trees, n as u32);
        }
    }

    #[test]
    fn test_farm_recommendations_skip_healthy() {
        let registry = SignatureRegistry::builtin();
        let apple = registry.crop("apple").ok();
        let session = FarmSession::new("apple", 10);
        session
            .ingest(&report_with(50.0, &[("healthy", 5), ("cedar_apple_rust", 2)]), None, apple)
            .unwrap();
        session
            .ingest(&report_with(0.0, &[("black_rot", 3)]), Some(Location::new(1.0, 1.0)), apple)
            .unwrap();

        let report = FarmReport::without_maps(&session.snapshot().unwrap(), apple);
        assert_eq!(report.recommendations.len(), 2);
        assert!(report.recommendations[0].contains("3 instance(s) of black_rot"));
        assert!(report.recommendations[1].contains("cedar_apple_rust"));
        assert_eq!(report.disease_distribution.get("healthy"), 5);
    }

    #[test]
    fn test_advisory_thresholds() {
        let summary = |healthy: u32, total: u32| FarmSummary {
            total_trees: total,
            healthy_trees: healthy,
            diseased_trees: total - healthy,
            average_health_score: 0.0,
            health_percentage: 0.0,
        };
        assert!(farm_advisories(&summary(4, 10))[0].starts_with("Urgent"));
        assert!(farm_advisories(&summary(7, 10))[0].starts_with("Warning"));
        assert!(farm_advisories(&summary(8, 10))[0].starts_with("Attention"));
        assert!(farm_advisories(&summary(9, 10))[0].starts_with("Farm health is good"));
    }

    #[test]
    fn test_report_json_shape() {
        let session = FarmSession::new("apple", 10);
        session.ingest(&report_with(80.0, &[("rust", 1)]), None, None).unwrap();
        let config = RenderConfig {
            farm_map_width: 200,
            farm_map_height: 150,
            ..RenderConfig::default()
        };
        let report = FarmReport::generate(&session.snapshot().unwrap(), None, &config);
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["farm_summary"]["total_trees"], 1);
        assert_eq!(value["disease_distribution"]["rust"], 1);
        assert!(value["visualizations"]["health_map"].is_string());
        assert!(value["visualizations"]["contour_map"].is_string());
        assert_eq!(value["tree_log"][0]["tree_id"], 1);
        assert!(value["tree_log"][0]["gps_location"]["y"].is_number());
    }
}
