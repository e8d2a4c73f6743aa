//! rollcall-service — async front for the match-decision engine.
//!
//! The engine runs on a dedicated OS thread owning the `MatchEngine`,
//! the roster handle, and a fixed-size rayon pool; async callers talk
//! to it through a clone-safe [`EngineHandle`] over an mpsc channel
//! with oneshot replies. Funneling registration and matching through
//! one request loop serializes re-registration against in-flight
//! matching: a match request takes its roster snapshot at the start
//! and completes deterministically against that version.

pub mod config;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use rollcall_core::fusion::FusionError;
use rollcall_core::{
    EmbeddingEncoder, EngineConfig, EnrollmentSample, FaceObservation, MatchDecision, MatchEngine,
    MatchError, ReferenceProfile, RosterHandle,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("fusion error: {0}")]
    Fusion(#[from] FusionError),
    #[error("match error: {0}")]
    Match(#[from] MatchError),
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of registering one student.
#[derive(Debug, Clone)]
pub struct RegisterResult {
    pub profile: ReferenceProfile,
    /// Roster version that now contains the profile.
    pub roster_version: u64,
}

/// Result of matching one photo.
#[derive(Debug, Clone)]
pub struct MatchPhotoResult {
    pub decisions: Vec<MatchDecision>,
    /// Roster version the photo was decided against.
    pub roster_version: u64,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Register {
        student_id: String,
        samples: Vec<EnrollmentSample>,
        reply: oneshot::Sender<Result<RegisterResult, EngineError>>,
    },
    MatchPhoto {
        faces: Vec<FaceObservation>,
        reply: oneshot::Sender<Result<MatchPhotoResult, EngineError>>,
    },
    RemoveStudent {
        student_id: String,
        reply: oneshot::Sender<u64>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Fuse enrollment samples into a reference profile and publish a
    /// new roster snapshot containing it.
    pub async fn register(
        &self,
        student_id: impl Into<String>,
        samples: Vec<EnrollmentSample>,
    ) -> Result<RegisterResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                student_id: student_id.into(),
                samples,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Decide every face in one photo against the current roster.
    pub async fn match_photo(
        &self,
        faces: Vec<FaceObservation>,
    ) -> Result<MatchPhotoResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::MatchPhoto { faces, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Drop a student from the roster. Returns the new version.
    pub async fn remove_student(&self, student_id: impl Into<String>) -> Result<u64, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::RemoveStudent {
                student_id: student_id.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Builds the match engine and its worker pool synchronously
/// (fail-fast), then enters the request loop.
pub fn spawn_engine(
    config: EngineConfig,
    encoder: Option<Arc<dyn EmbeddingEncoder>>,
) -> Result<EngineHandle, EngineError> {
    let workers = config.workers;
    let engine = match encoder {
        Some(enc) => MatchEngine::with_encoder(config, enc)?,
        None => MatchEngine::new(config),
    };

    // Fixed-size worker pool for per-face work; 0 lets rayon size it
    // to the available cores.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("rollcall-worker-{i}"))
        .build()
        .map_err(|e| EngineError::WorkerPool(e.to_string()))?;

    let roster = RosterHandle::new(engine.config().encoder.embedding_dim());
    tracing::info!(
        encoder = ?engine.config().encoder,
        workers = pool.current_num_threads(),
        "match engine ready"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { student_id, samples, reply } => {
                        let result = run_register(&engine, &roster, &student_id, &samples);
                        let _ = reply.send(result);
                    }
                    EngineRequest::MatchPhoto { faces, reply } => {
                        let result = run_match(&engine, &roster, &pool, faces);
                        let _ = reply.send(result);
                    }
                    EngineRequest::RemoveStudent { student_id, reply } => {
                        let version = roster.remove(&student_id);
                        tracing::info!(student_id, version, "student removed");
                        let _ = reply.send(version);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

fn run_register(
    engine: &MatchEngine,
    roster: &RosterHandle,
    student_id: &str,
    samples: &[EnrollmentSample],
) -> Result<RegisterResult, EngineError> {
    let profile = engine.register_student(student_id, samples)?;
    let roster_version = roster.upsert(profile.clone())?;
    Ok(RegisterResult { profile, roster_version })
}

fn run_match(
    engine: &MatchEngine,
    roster: &RosterHandle,
    pool: &rayon::ThreadPool,
    faces: Vec<FaceObservation>,
) -> Result<MatchPhotoResult, EngineError> {
    // Snapshot once; the request completes against this version even
    // if a registration lands meanwhile.
    let snapshot = roster.snapshot();
    let decisions = pool.install(|| engine.match_photo(&snapshot, &faces))?;
    Ok(MatchPhotoResult {
        decisions,
        roster_version: snapshot.version(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::types::{BoundingBox, Embedding, FaceCrop};
    use rollcall_core::{DecisionReason, EncoderModel};

    const DIM: usize = 128;

    fn test_config() -> EngineConfig {
        EngineConfig {
            encoder: EncoderModel::FaceNet128,
            workers: 2,
            ..EngineConfig::default()
        }
    }

    fn vec_embedding(head: &[f32]) -> Embedding {
        let mut values = vec![0.0f32; DIM];
        values[..head.len()].copy_from_slice(head);
        Embedding::new(values)
    }

    fn sharp_face(embedding: Option<Embedding>) -> FaceObservation {
        let side = 120u32;
        let mut data = Vec::with_capacity((side * side) as usize);
        for y in 0..side {
            for x in 0..side {
                data.push(if (x + y) % 2 == 0 { 0 } else { 255 });
            }
        }
        FaceObservation {
            bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 120.0, height: 120.0 },
            crop: FaceCrop { width: side, height: side, data },
            embedding,
        }
    }

    fn samples(head: &[f32]) -> Vec<EnrollmentSample> {
        vec![EnrollmentSample { embedding: vec_embedding(head), quality_score: 0.9 }]
    }

    #[tokio::test]
    async fn test_register_then_match() {
        let handle = spawn_engine(test_config(), None).unwrap();

        let reg = handle.register("alice", samples(&[6.0])).await.unwrap();
        assert_eq!(reg.profile.student_id, "alice");
        assert_eq!(reg.roster_version, 1);

        let result = handle
            .match_photo(vec![sharp_face(Some(vec_embedding(&[6.0, 0.3])))])
            .await
            .unwrap();
        assert_eq!(result.roster_version, 1);
        assert_eq!(result.decisions.len(), 1);
        assert_eq!(result.decisions[0].student_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_empty_roster_decides_no_candidates() {
        let handle = spawn_engine(test_config(), None).unwrap();
        let result = handle
            .match_photo(vec![sharp_face(Some(vec_embedding(&[6.0])))])
            .await
            .unwrap();
        assert_eq!(result.decisions[0].reason, DecisionReason::NoCandidates);
    }

    #[tokio::test]
    async fn test_structural_error_propagates() {
        let handle = spawn_engine(test_config(), None).unwrap();
        let result = handle
            .match_photo(vec![sharp_face(Some(Embedding::new(vec![0.0; 64])))])
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Match(MatchError::DimensionMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reregistration_bumps_version() {
        let handle = spawn_engine(test_config(), None).unwrap();
        handle.register("alice", samples(&[6.0])).await.unwrap();
        let reg = handle.register("alice", samples(&[6.0, 0.1])).await.unwrap();
        assert_eq!(reg.roster_version, 2);

        let removed_at = handle.remove_student("alice").await.unwrap();
        assert_eq!(removed_at, 3);
    }
}
