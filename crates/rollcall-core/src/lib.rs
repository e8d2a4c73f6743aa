//! rollcall-core — match-decision engine for photo-based attendance.
//!
//! Takes per-face embeddings from an external detector/encoder plus a
//! roster of enrolled reference profiles, and decides which student
//! (if any) each detected face belongs to: quality gating, borderline
//! enhancement, multi-sample enrollment fusion, combined distance
//! scoring, and group-size-aware adaptive thresholds.

pub mod config;
pub mod enhance;
pub mod fusion;
pub mod quality;
pub mod resolver;
pub mod roster;
pub mod scoring;
pub mod threshold;
pub mod types;

pub use config::EngineConfig;
pub use resolver::{MatchEngine, MatchError};
pub use roster::{RosterHandle, RosterSnapshot};
pub use types::{
    BoundingBox, DecisionReason, Embedding, EmbeddingEncoder, EncoderModel, EnrollmentSample,
    FaceCrop, FaceObservation, MatchDecision, ReferenceProfile,
};
