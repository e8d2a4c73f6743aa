//! Match Resolver.
//!
//! Per-face orchestration: Detected -> QualityChecked -> {Rejected |
//! Scored} -> Decided. Quality and size gates run first, borderline
//! crops are enhanced and re-encoded, survivors are scored against
//! every profile in the roster snapshot, and the adaptive threshold
//! plus ambiguity rules produce the final decision.
//!
//! Per-face conditions are data (reason codes), never errors. Only
//! structural defects — malformed crops, embedding dimension
//! mismatches, a broken roster — fail the whole photo, and then no
//! partial decision list is returned.

use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::enhance;
use crate::fusion::{self, FusionError};
use crate::quality;
use crate::roster::RosterSnapshot;
use crate::scoring::{CandidateScore, DistanceScorer};
use crate::threshold::ThresholdEngine;
use crate::types::{
    DecisionReason, EmbeddingEncoder, EnrollmentSample, FaceObservation, MatchDecision,
    ReferenceProfile,
};

/// Structural failures of a whole `match_photo` call. These indicate
/// configuration or integration defects, not recognition edge cases.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("malformed roster: {0}")]
    MalformedRoster(String),
    #[error("malformed observation at index {index}: {detail}")]
    MalformedObservation { index: usize, detail: String },
    #[error("encoder model does not match engine configuration")]
    EncoderMismatch,
}

/// Blend weights for the final confidence; calibrated together with
/// the scoring constants.
const FINAL_RAW_WEIGHT: f32 = 0.6;
const FINAL_COSINE_WEIGHT: f32 = 0.4;

/// The match-decision engine. Pure and synchronous; per-face work is
/// fanned out over rayon's worker pool. Safe to share across threads.
pub struct MatchEngine {
    config: EngineConfig,
    scorer: DistanceScorer,
    thresholds: ThresholdEngine,
    encoder: Option<Arc<dyn EmbeddingEncoder>>,
}

impl MatchEngine {
    /// Engine without a re-encoding hook: borderline crops are still
    /// enhanced-gated, but embeddings are used as supplied.
    pub fn new(config: EngineConfig) -> Self {
        let scorer = DistanceScorer::new(config.scoring.clone());
        let thresholds = ThresholdEngine::new(config.thresholds.clone());
        Self { config, scorer, thresholds, encoder: None }
    }

    /// Engine with an external encoder for re-encoding enhanced crops.
    /// The encoder's model must match the configured one — the strategy
    /// is fixed at construction, never re-dispatched per call.
    pub fn with_encoder(
        config: EngineConfig,
        encoder: Arc<dyn EmbeddingEncoder>,
    ) -> Result<Self, MatchError> {
        if encoder.model() != config.encoder {
            return Err(MatchError::EncoderMismatch);
        }
        let mut engine = Self::new(config);
        engine.encoder = Some(encoder);
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn embedding_dim(&self) -> usize {
        self.config.encoder.embedding_dim()
    }

    /// Run Embedding Fusion over a student's enrollment samples and
    /// produce the reference profile that replaces any prior one.
    pub fn register_student(
        &self,
        student_id: &str,
        samples: &[EnrollmentSample],
    ) -> Result<ReferenceProfile, FusionError> {
        let fused = fusion::fuse(samples, &self.config.fusion, self.embedding_dim())?;
        tracing::info!(
            student_id,
            samples = samples.len(),
            retained = fused.sample_count,
            confidence = fused.confidence,
            "student registered"
        );
        Ok(ReferenceProfile {
            student_id: student_id.to_string(),
            reference_embedding: fused.embedding,
            enrollment_confidence: fused.confidence,
            sample_count: fused.sample_count,
            created_at: chrono::Utc::now(),
        })
    }

    /// Decide every face in one photo against the roster snapshot.
    ///
    /// Returns one decision per input face, in input order, rejected
    /// faces included with their reason codes. All-or-nothing: a
    /// structural defect fails the whole photo rather than returning
    /// a silently-incomplete attendance record.
    pub fn match_photo(
        &self,
        roster: &RosterSnapshot,
        faces: &[FaceObservation],
    ) -> Result<Vec<MatchDecision>, MatchError> {
        self.validate_photo(faces)?;

        let group_size = faces.len();
        let decisions: Vec<MatchDecision> = faces
            .par_iter()
            .enumerate()
            .map(|(index, face)| self.decide_face(index, face, roster, group_size))
            .collect();

        let matched = decisions.iter().filter(|d| d.student_id.is_some()).count();
        tracing::info!(
            roster_version = roster.version(),
            faces = group_size,
            matched,
            "photo decided"
        );
        Ok(decisions)
    }

    /// Structural validation, up front so the parallel per-face pass
    /// is infallible.
    fn validate_photo(&self, faces: &[FaceObservation]) -> Result<(), MatchError> {
        let dim = self.embedding_dim();
        for (index, face) in faces.iter().enumerate() {
            if !face.crop.is_well_formed() {
                return Err(MatchError::MalformedObservation {
                    index,
                    detail: format!(
                        "crop buffer holds {} bytes for {}x{}",
                        face.crop.data.len(),
                        face.crop.width,
                        face.crop.height
                    ),
                });
            }
            if let Some(embedding) = &face.embedding {
                if embedding.dim() != dim {
                    return Err(MatchError::DimensionMismatch {
                        expected: dim,
                        got: embedding.dim(),
                    });
                }
            }
        }
        Ok(())
    }

    fn decide_face(
        &self,
        index: usize,
        face: &FaceObservation,
        roster: &RosterSnapshot,
        group_size: usize,
    ) -> MatchDecision {
        let qcfg = &self.config.quality;

        // Detected -> Rejected: size gate before anything else.
        let bbox = &face.bounding_box;
        if bbox.width < qcfg.min_face_size_px || bbox.height < qcfg.min_face_size_px {
            return rejected(index, DecisionReason::TooSmall);
        }

        // Detected -> QualityChecked.
        let quality = quality::assess(&face.crop, bbox, qcfg);
        if quality < qcfg.quality_floor {
            tracing::debug!(index, quality, "face rejected below quality floor");
            return rejected(index, DecisionReason::LowQuality);
        }

        // Borderline band: enhance and re-encode in place of the
        // original embedding. Failures fall back to the original.
        let mut embedding = face.embedding.clone();
        if enhance::should_enhance(quality, qcfg) {
            if let Some(encoder) = &self.encoder {
                let enhanced = enhance::enhance(&face.crop);
                match encoder.encode(&enhanced) {
                    Some(e) if e.dim() == self.embedding_dim() => {
                        tracing::debug!(index, quality, "borderline face re-encoded");
                        embedding = Some(e);
                    }
                    Some(e) => {
                        tracing::warn!(
                            index,
                            got = e.dim(),
                            "encoder returned wrong dimension for enhanced crop; keeping original"
                        );
                    }
                    None => {
                        tracing::debug!(index, "encoder failed on enhanced crop; keeping original");
                    }
                }
            }
        }

        // Encoder failure is its own reason code so callers can tell
        // detector failure from recognition failure.
        let Some(probe) = embedding else {
            return rejected(index, DecisionReason::NoEmbedding);
        };

        // QualityChecked -> Scored: every profile in the snapshot.
        let mut best: Option<(usize, CandidateScore)> = None;
        let mut second: Option<CandidateScore> = None;
        for (pi, profile) in roster.profiles().iter().enumerate() {
            let score = self.scorer.score(&probe, &profile.reference_embedding);
            if !score.is_finite() {
                continue;
            }
            match best {
                Some((_, b)) if score.combined_distance >= b.combined_distance => {
                    if second.map_or(true, |s| score.combined_distance < s.combined_distance) {
                        second = Some(score);
                    }
                }
                Some((_, b)) => {
                    second = Some(b);
                    best = Some((pi, score));
                }
                None => best = Some((pi, score)),
            }
        }

        let Some((best_idx, best_score)) = best else {
            return MatchDecision {
                face_index: index,
                student_id: None,
                final_confidence: 0.0,
                is_ambiguous: false,
                reason: DecisionReason::NoCandidates,
                best_distance: None,
                second_distance: None,
            };
        };

        // Scored -> Decided.
        let student_id = &roster.profiles()[best_idx].student_id;
        self.decide_scored(index, student_id, quality, best_score, second, group_size)
    }

    fn decide_scored(
        &self,
        index: usize,
        student_id: &str,
        quality: f32,
        best: CandidateScore,
        second: Option<CandidateScore>,
        group_size: usize,
    ) -> MatchDecision {
        let second_distance = second.map(|s| s.combined_distance);
        let is_ambiguous = self
            .thresholds
            .is_ambiguous(best.combined_distance, second_distance);

        let quality_factor = 0.5 + 0.5 * quality.clamp(0.0, 1.0);
        let final_confidence = ((FINAL_RAW_WEIGHT * best.raw_confidence
            + FINAL_COSINE_WEIGHT * best.cosine_similarity.clamp(0.0, 1.0))
            * quality_factor)
            .clamp(0.0, 1.0);

        // The gate runs on the raw confidence, i.e. on the distance
        // scale: quality widens the acceptable distance via the
        // effective threshold, while the reported final confidence
        // stays quality-scaled and is never inflated.
        let threshold = self
            .thresholds
            .effective_threshold(group_size, quality, &self.scorer);

        let clears_threshold = best.raw_confidence > threshold;
        let clears_override = best.raw_confidence >= self.thresholds.ambiguity_override();

        let reason = if is_ambiguous && !clears_override {
            DecisionReason::Ambiguous
        } else if clears_threshold {
            DecisionReason::Matched
        } else {
            DecisionReason::BelowThreshold
        };

        tracing::debug!(
            index,
            student_id,
            distance = best.combined_distance,
            raw = best.raw_confidence,
            final_confidence,
            threshold,
            is_ambiguous,
            reason = reason.code(),
            group_size,
            "face decided"
        );

        MatchDecision {
            face_index: index,
            student_id: (reason == DecisionReason::Matched).then(|| student_id.to_string()),
            final_confidence,
            is_ambiguous,
            reason,
            best_distance: Some(best.combined_distance),
            second_distance,
        }
    }
}

fn rejected(index: usize, reason: DecisionReason) -> MatchDecision {
    MatchDecision {
        face_index: index,
        student_id: None,
        final_confidence: 0.0,
        is_ambiguous: false,
        reason,
        best_distance: None,
        second_distance: None,
    }
}
