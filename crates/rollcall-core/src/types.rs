use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face in the source photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Pixel area of the box.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Grayscale face crop, row-major, one byte per pixel.
///
/// Exclusively owned by the observation that carries it; never
/// persisted beyond a single match request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceCrop {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FaceCrop {
    /// True when `data` holds exactly `width * height` pixels.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes all dimensions; a zero vector yields 0.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance to another embedding.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// L2 norm of the vector.
    pub fn l2_norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

/// One detected face in one photo, as produced by the external
/// detector/encoder. `embedding` is `None` when the encoder failed
/// for this face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceObservation {
    pub bounding_box: BoundingBox,
    pub crop: FaceCrop,
    pub embedding: Option<Embedding>,
}

/// One registration photo for one student, pre-fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentSample {
    pub embedding: Embedding,
    /// Quality of the sample's crop, in [0, 1].
    pub quality_score: f32,
}

/// Fused reference for one enrolled student. Replaced wholesale on
/// re-registration, never partially updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceProfile {
    pub student_id: String,
    pub reference_embedding: Embedding,
    /// Consistency of the enrollment samples, in [0, 1].
    pub enrollment_confidence: f32,
    /// Non-outlier samples that contributed to the fusion.
    pub sample_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Why a face ended up without a student id (or with one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Best candidate cleared every bar.
    Matched,
    /// Encoder produced no embedding for this face.
    NoEmbedding,
    /// Composite quality below the configured floor.
    LowQuality,
    /// Bounding box below the minimum pixel size.
    TooSmall,
    /// Roster empty, or every candidate score was non-finite.
    NoCandidates,
    /// Top-2 margin below the ambiguity margin and confidence below
    /// the override bar.
    Ambiguous,
    /// Best candidate below the group-size-adjusted threshold.
    BelowThreshold,
}

impl DecisionReason {
    /// Stable string code, matching the serialized form.
    pub fn code(&self) -> &'static str {
        match self {
            DecisionReason::Matched => "matched",
            DecisionReason::NoEmbedding => "no_embedding",
            DecisionReason::LowQuality => "low_quality",
            DecisionReason::TooSmall => "too_small",
            DecisionReason::NoCandidates => "no_candidates",
            DecisionReason::Ambiguous => "ambiguous",
            DecisionReason::BelowThreshold => "below_threshold",
        }
    }
}

/// Engine output for one detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDecision {
    /// Index of the face in the `match_photo` input.
    pub face_index: usize,
    /// `None` means unmatched (see `reason`).
    pub student_id: Option<String>,
    pub final_confidence: f32,
    /// Top-2 candidates were too close to call confidently.
    pub is_ambiguous: bool,
    pub reason: DecisionReason,
    /// Combined distance of the best candidate, when any was scored.
    pub best_distance: Option<f32>,
    /// Combined distance of the runner-up, when one existed.
    pub second_distance: Option<f32>,
}

/// Closed set of supported encoder backends, fixed at engine
/// construction. The scoring constants are calibrated per model and
/// do not transfer between variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderModel {
    /// InsightFace ArcFace w600k_r50, 512-d output.
    ArcFaceW600kR50,
    /// FaceNet-style 128-d output.
    FaceNet128,
}

impl EncoderModel {
    pub fn embedding_dim(&self) -> usize {
        match self {
            EncoderModel::ArcFaceW600kR50 => 512,
            EncoderModel::FaceNet128 => 128,
        }
    }
}

/// External embedding encoder, supplied by the detector/encoder
/// library. The engine only calls it to re-encode enhanced crops;
/// initial embeddings arrive on the `FaceObservation`.
pub trait EmbeddingEncoder: Send + Sync {
    fn model(&self) -> EncoderModel;

    /// Encode a grayscale crop. `None` signals encoder failure.
    fn encode(&self, crop: &FaceCrop) -> Option<Embedding>;
}
