//! Distance Scorer.
//!
//! Combines Euclidean and cosine measures into one scalar distance,
//! then maps it to a normalized confidence. The cosine term is scaled
//! onto the Euclidean term's numeric order by a per-encoder constant;
//! the lenience pair (K x normalizer) sets the distance that maps to
//! zero confidence. All four constants are calibrated together for
//! one encoder and do not transfer to another.

use crate::config::ScoringConfig;
use crate::types::Embedding;

/// One scored (probe, reference) pairing. Transient: created and
/// discarded within a single resolver invocation.
#[derive(Debug, Clone, Copy)]
pub struct CandidateScore {
    pub combined_distance: f32,
    /// Normalized confidence in [0, 1].
    pub raw_confidence: f32,
    /// Cosine similarity of the pair, kept for the final-confidence
    /// blend.
    pub cosine_similarity: f32,
}

impl CandidateScore {
    pub fn is_finite(&self) -> bool {
        self.combined_distance.is_finite() && self.raw_confidence.is_finite()
    }
}

#[derive(Debug, Clone)]
pub struct DistanceScorer {
    cfg: ScoringConfig,
}

impl DistanceScorer {
    pub fn new(cfg: ScoringConfig) -> Self {
        Self { cfg }
    }

    /// Score a probe embedding against one reference embedding.
    ///
    /// Dimensions must already be validated by the caller; mismatched
    /// vectors would silently truncate.
    pub fn score(&self, probe: &Embedding, reference: &Embedding) -> CandidateScore {
        let euclidean = probe.euclidean_distance(reference);
        let cosine_similarity = probe.cosine_similarity(reference);
        let cosine_distance = 1.0 - cosine_similarity;

        let combined_distance = self.cfg.euclidean_weight * euclidean
            + self.cfg.cosine_weight * (cosine_distance * self.cfg.cosine_scale);

        CandidateScore {
            combined_distance,
            raw_confidence: self.confidence_for_distance(combined_distance),
            cosine_similarity,
        }
    }

    /// Map a combined distance to a confidence in [0, 1].
    /// Monotonically non-increasing in distance.
    pub fn confidence_for_distance(&self, distance: f32) -> f32 {
        (1.0 - distance / self.cfg.distance_span()).max(0.0)
    }

    /// Express a distance allowance in confidence units, for moving a
    /// threshold on the raw-distance scale.
    pub fn confidence_margin_for_distance(&self, distance: f32) -> f32 {
        distance / self.cfg.distance_span()
    }
}
