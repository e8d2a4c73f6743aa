//! Engine configuration.
//!
//! Every empirically tuned constant lives here as a named field with
//! a calibrated default. The quality weights, the cosine scale, and
//! the lenience pair were tuned together against one encoder's output
//! distribution; changing the encoder requires re-deriving all of
//! them as a set.

use serde::{Deserialize, Serialize};

use crate::types::EncoderModel;

/// Quality Assessor weights and gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Faces scoring below this composite quality are rejected.
    pub quality_floor: f32,
    /// Faces with either bounding-box dimension below this are rejected.
    pub min_face_size_px: f32,
    /// Enhancement runs only for quality in [floor, ceiling).
    pub enhancement_ceiling: f32,

    pub sharpness_weight: f32,
    pub size_weight: f32,
    pub brightness_weight: f32,
    pub contrast_weight: f32,

    /// Laplacian-variance value treated as "fully sharp".
    pub sharpness_ceiling: f32,
    /// Bounding-box area (px^2) treated as "fully sized".
    pub good_face_area_px: f32,
    /// Mid-gray luminance target for the brightness sub-score.
    pub brightness_target: f32,
    /// Luminance standard deviation treated as "full contrast".
    pub contrast_ceiling: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            quality_floor: 0.30,
            min_face_size_px: 30.0,
            enhancement_ceiling: 0.60,
            sharpness_weight: 0.35,
            size_weight: 0.30,
            brightness_weight: 0.20,
            contrast_weight: 0.15,
            sharpness_ceiling: 600.0,
            good_face_area_px: 14_400.0, // 120x120
            brightness_target: 128.0,
            contrast_ceiling: 60.0,
        }
    }
}

/// Distance Scorer constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub euclidean_weight: f32,
    pub cosine_weight: f32,
    /// Brings cosine distance onto the Euclidean term's numeric order
    /// for the calibrated encoder. Not a general law; re-derive when
    /// the encoder changes.
    pub cosine_scale: f32,
    /// Lenience constant K. Larger K is more permissive.
    pub lenience_k: f32,
    /// Distance span over which K is applied. `lenience_k *
    /// distance_normalizer` is the combined distance mapping to zero
    /// confidence; the pair is calibrated together.
    pub distance_normalizer: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            euclidean_weight: 0.7,
            cosine_weight: 0.3,
            cosine_scale: 20.0,
            lenience_k: 0.8,
            distance_normalizer: 40.0,
        }
    }
}

impl ScoringConfig {
    /// Combined distance that maps to zero confidence.
    pub fn distance_span(&self) -> f32 {
        self.lenience_k * self.distance_normalizer
    }
}

/// Adaptive Threshold Engine table and ambiguity rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Confidence threshold for a single-face photo.
    pub single: f32,
    /// Threshold for 2..=small_group_max faces.
    pub small_group: f32,
    /// Threshold above small_group_max faces.
    pub large_group: f32,
    pub small_group_max: usize,

    /// Top-2 combined-distance gap below which a match is ambiguous.
    pub ambiguity_margin: f32,
    /// An ambiguous match is only accepted at or above this raw
    /// confidence, overriding the group-size threshold.
    pub ambiguity_override_confidence: f32,
    /// Maximum distance allowance granted to a zero-quality face; the
    /// allowance shrinks linearly to zero at quality 1.0. Applied on
    /// the raw-distance scale, never to the reported confidence.
    pub quality_distance_slack: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            single: 0.25,
            small_group: 0.35,
            large_group: 0.45,
            small_group_max: 10,
            ambiguity_margin: 3.0,
            ambiguity_override_confidence: 0.70,
            quality_distance_slack: 3.0,
        }
    }
}

/// Embedding Fusion constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// IQR multiplier for the centroid-distance outlier fence.
    pub outlier_iqr_multiplier: f32,
    /// Exponent applied to sample quality in `exp(q * exponent)`.
    pub quality_weight_exponent: f32,
    /// Rejecting more than this fraction of samples penalizes the
    /// enrollment confidence.
    pub max_outlier_fraction: f32,
    /// Multiplier applied to confidence when the fraction is exceeded.
    pub outlier_penalty: f32,
    /// Mean centroid distance of retained samples mapping to zero
    /// enrollment confidence.
    pub spread_ceiling: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            outlier_iqr_multiplier: 1.5,
            quality_weight_exponent: 2.0,
            max_outlier_fraction: 0.4,
            outlier_penalty: 0.7,
            spread_ceiling: 10.0,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub encoder: EncoderModel,
    pub quality: QualityConfig,
    pub scoring: ScoringConfig,
    pub thresholds: ThresholdConfig,
    pub fusion: FusionConfig,
    /// Worker threads for per-face work; 0 means one per CPU core.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderModel::ArcFaceW600kR50,
            quality: QualityConfig::default(),
            scoring: ScoringConfig::default(),
            thresholds: ThresholdConfig::default(),
            fusion: FusionConfig::default(),
            workers: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_weights_sum_to_one() {
        let q = QualityConfig::default();
        let sum = q.sharpness_weight + q.size_weight + q.brightness_weight + q.contrast_weight;
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_tiers_ordered() {
        let t = ThresholdConfig::default();
        assert!(t.single < t.small_group);
        assert!(t.small_group < t.large_group);
        assert!(t.large_group < t.ambiguity_override_confidence);
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        // Missing sections fall back to defaults via serde(default).
        let json = r#"{ "quality": { "quality_floor": 0.5 }, "workers": 4 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.quality.quality_floor, 0.5);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.quality.min_face_size_px, 30.0);
        assert_eq!(cfg.scoring.cosine_scale, 20.0);
    }

    #[test]
    fn test_distance_span() {
        let s = ScoringConfig::default();
        assert!((s.distance_span() - 32.0).abs() < 1e-6);
    }
}
