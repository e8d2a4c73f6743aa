//! Adaptive Threshold Engine.
//!
//! Selects the accept/reject confidence cutoff for a photo from its
//! group size, loosens it in distance units for low-quality faces,
//! and flags top-2 ambiguity. Large groups carry a higher prior
//! collision risk, so their cutoff is strictest.

use crate::config::ThresholdConfig;
use crate::scoring::DistanceScorer;

#[derive(Debug, Clone)]
pub struct ThresholdEngine {
    cfg: ThresholdConfig,
}

impl ThresholdEngine {
    pub fn new(cfg: ThresholdConfig) -> Self {
        Self { cfg }
    }

    /// Three-tier confidence threshold by group size.
    pub fn tier_threshold(&self, group_size: usize) -> f32 {
        if group_size <= 1 {
            self.cfg.single
        } else if group_size <= self.cfg.small_group_max {
            self.cfg.small_group
        } else {
            self.cfg.large_group
        }
    }

    /// Tier threshold adjusted for the face's own quality.
    ///
    /// A blurry-but-correct face should not be penalized, so low
    /// quality widens the acceptable distance: the allowance
    /// `(1 - quality) * slack` is expressed in distance units and
    /// converted through the scorer, lowering the confidence cutoff.
    /// Reported confidences are never inflated by this.
    pub fn effective_threshold(
        &self,
        group_size: usize,
        quality: f32,
        scorer: &DistanceScorer,
    ) -> f32 {
        let tier = self.tier_threshold(group_size);
        let allowance = (1.0 - quality.clamp(0.0, 1.0)) * self.cfg.quality_distance_slack;
        (tier - scorer.confidence_margin_for_distance(allowance)).max(0.0)
    }

    /// True when the best and second-best candidates are too close to
    /// call. A face with no runner-up is never ambiguous.
    pub fn is_ambiguous(&self, best_distance: f32, second_distance: Option<f32>) -> bool {
        match second_distance {
            Some(second) => second - best_distance < self.cfg.ambiguity_margin,
            None => false,
        }
    }

    /// Confidence an ambiguous match must reach to be accepted,
    /// overriding the (lower) group-size threshold.
    pub fn ambiguity_override(&self) -> f32 {
        self.cfg.ambiguity_override_confidence
    }
}
