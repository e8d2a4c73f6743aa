//! Embedding Fusion.
//!
//! Builds one reference embedding per student from N enrollment
//! samples: IQR-based outlier rejection against the provisional
//! centroid, exponential quality weighting of the survivors, and a
//! confidence derived from how tightly the retained samples cluster.

use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

use crate::config::FusionConfig;
use crate::types::{Embedding, EnrollmentSample};

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("no enrollment samples provided")]
    NoSamples,
    #[error("sample embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Fusion output, pre-profile.
#[derive(Debug, Clone)]
pub struct FusedEmbedding {
    pub embedding: Embedding,
    /// Consistency of the retained samples, in [0, 1].
    pub confidence: f32,
    /// Samples that survived outlier rejection.
    pub sample_count: usize,
    /// Samples excluded as outliers.
    pub outliers_rejected: usize,
}

/// Enrollment confidence ceiling for the all-outliers fallback.
const FALLBACK_CONFIDENCE_CAP: f32 = 0.25;

/// Fuse enrollment samples into a single reference embedding.
///
/// `expected_dim` is the active encoder's output dimension; every
/// sample must match it.
pub fn fuse(
    samples: &[EnrollmentSample],
    cfg: &FusionConfig,
    expected_dim: usize,
) -> Result<FusedEmbedding, FusionError> {
    if samples.is_empty() {
        return Err(FusionError::NoSamples);
    }
    for s in samples {
        if s.embedding.dim() != expected_dim {
            return Err(FusionError::DimensionMismatch {
                expected: expected_dim,
                got: s.embedding.dim(),
            });
        }
    }

    // Single sample: it is the reference, confidence is its quality.
    if samples.len() == 1 {
        return Ok(FusedEmbedding {
            embedding: samples[0].embedding.clone(),
            confidence: samples[0].quality_score.clamp(0.0, 1.0),
            sample_count: 1,
            outliers_rejected: 0,
        });
    }

    let matrix = sample_matrix(samples, expected_dim);
    let centroid = matrix.mean_axis(Axis(0)).expect("non-empty sample matrix");

    // Distance of every sample to the provisional centroid.
    let distances: Vec<f32> = matrix
        .axis_iter(Axis(0))
        .map(|row| (&row - &centroid).mapv(|v| v * v).sum().sqrt())
        .collect();

    let q1 = quantile(&distances, 0.25);
    let q3 = quantile(&distances, 0.75);
    let fence = q3 + cfg.outlier_iqr_multiplier * (q3 - q1);

    let retained: Vec<usize> = (0..samples.len()).filter(|&i| distances[i] <= fence).collect();
    let rejected = samples.len() - retained.len();

    if retained.is_empty() {
        // Degenerate spread: fall back to the unweighted centroid of
        // everything, flagged with low confidence.
        tracing::warn!(
            samples = samples.len(),
            "fusion: outlier fence excluded every sample, using raw centroid"
        );
        let embedding = Embedding::new(centroid.to_vec());
        let spread = distances.iter().sum::<f32>() / distances.len() as f32;
        let confidence =
            spread_confidence(spread, cfg.spread_ceiling).min(FALLBACK_CONFIDENCE_CAP);
        return Ok(FusedEmbedding {
            embedding,
            confidence,
            sample_count: samples.len(),
            outliers_rejected: 0,
        });
    }

    // Quality-weighted average: exp(q * exponent) lets high-quality
    // samples dominate disproportionately.
    let dim = expected_dim;
    let mut fused = Array1::<f32>::zeros(dim);
    let mut weight_sum = 0.0f32;
    let mut norm_sum = 0.0f32;
    for &i in &retained {
        let w = (samples[i].quality_score.clamp(0.0, 1.0) * cfg.quality_weight_exponent).exp();
        fused = fused + matrix.row(i).to_owned() * w;
        weight_sum += w;
        norm_sum += samples[i].embedding.l2_norm();
    }
    fused /= weight_sum;

    // Renormalize to the embedding space's expected scale: the mean
    // L2 norm of the retained inputs.
    let target_norm = norm_sum / retained.len() as f32;
    let fused_norm = fused.mapv(|v| v * v).sum().sqrt();
    if fused_norm > 0.0 && target_norm > 0.0 {
        fused *= target_norm / fused_norm;
    }

    let embedding = Embedding::new(fused.to_vec());

    // Spread of the retained samples around the fused reference.
    let spread = retained
        .iter()
        .map(|&i| samples[i].embedding.euclidean_distance(&embedding))
        .sum::<f32>()
        / retained.len() as f32;

    let mut confidence = spread_confidence(spread, cfg.spread_ceiling);
    let rejected_fraction = rejected as f32 / samples.len() as f32;
    if rejected_fraction > cfg.max_outlier_fraction {
        confidence *= cfg.outlier_penalty;
    }

    tracing::debug!(
        retained = retained.len(),
        rejected,
        spread,
        confidence,
        "fusion complete"
    );

    Ok(FusedEmbedding {
        embedding,
        confidence,
        sample_count: retained.len(),
        outliers_rejected: rejected,
    })
}

fn sample_matrix(samples: &[EnrollmentSample], dim: usize) -> Array2<f32> {
    let mut matrix = Array2::<f32>::zeros((samples.len(), dim));
    for (i, s) in samples.iter().enumerate() {
        for (j, &v) in s.embedding.values.iter().enumerate() {
            matrix[[i, j]] = v;
        }
    }
    matrix
}

/// Tighter clustering means higher confidence; never below zero.
fn spread_confidence(spread: f32, ceiling: f32) -> f32 {
    (1.0 - spread / ceiling).clamp(0.0, 1.0)
}

/// Linear-interpolation quantile of an unsorted slice.
fn quantile(values: &[f32], q: f32) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DIM: usize = 128;

    fn sample(base: &[f32], quality: f32) -> EnrollmentSample {
        EnrollmentSample {
            embedding: Embedding::new(base.to_vec()),
            quality_score: quality,
        }
    }

    /// Cluster of near-identical vectors with small seeded jitter.
    fn jittered_cluster(n: usize, center: f32, jitter: f32, seed: u64) -> Vec<EnrollmentSample> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let values: Vec<f32> =
                    (0..DIM).map(|_| center + rng.gen_range(-jitter..jitter)).collect();
                EnrollmentSample { embedding: Embedding::new(values), quality_score: 0.8 }
            })
            .collect()
    }

    #[test]
    fn test_single_sample_passthrough() {
        let cfg = FusionConfig::default();
        let base = vec![0.5f32; DIM];
        let out = fuse(&[sample(&base, 0.72)], &cfg, DIM).unwrap();
        assert_eq!(out.embedding.values, base);
        assert!((out.confidence - 0.72).abs() < 1e-6);
        assert_eq!(out.sample_count, 1);
    }

    #[test]
    fn test_no_samples_is_error() {
        let cfg = FusionConfig::default();
        assert!(matches!(fuse(&[], &cfg, DIM), Err(FusionError::NoSamples)));
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let cfg = FusionConfig::default();
        let s = sample(&vec![0.0; 64], 0.5);
        match fuse(&[s], &cfg, DIM) {
            Err(FusionError::DimensionMismatch { expected, got }) => {
                assert_eq!(expected, DIM);
                assert_eq!(got, 64);
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_far_outlier_excluded() {
        // Four tight inliers plus one sample 10x+ the median pairwise
        // distance away. The fence must drop it, and the fused vector
        // must sit with the inliers.
        let cfg = FusionConfig::default();
        let mut samples = jittered_cluster(4, 1.0, 0.01, 7);
        let outlier_vec = vec![50.0f32; DIM];
        samples.push(sample(&outlier_vec, 0.9));

        let out = fuse(&samples, &cfg, DIM).unwrap();
        assert_eq!(out.outliers_rejected, 1);
        assert_eq!(out.sample_count, 4);

        let inlier_centroid = {
            let mut acc = vec![0.0f32; DIM];
            for s in &samples[..4] {
                for (a, v) in acc.iter_mut().zip(&s.embedding.values) {
                    *a += v / 4.0;
                }
            }
            Embedding::new(acc)
        };
        let outlier = Embedding::new(outlier_vec);
        let d_out = out.embedding.euclidean_distance(&outlier);
        let d_in = out.embedding.euclidean_distance(&inlier_centroid);
        assert!(d_out > d_in, "fused must cluster with inliers: {d_out} vs {d_in}");
    }

    #[test]
    fn test_confidence_decreases_with_spread() {
        let cfg = FusionConfig::default();
        let tight = fuse(&jittered_cluster(5, 1.0, 0.005, 11), &cfg, DIM).unwrap();
        let loose = fuse(&jittered_cluster(5, 1.0, 0.3, 11), &cfg, DIM).unwrap();
        assert!(tight.confidence > loose.confidence);
    }

    #[test]
    fn test_quality_weighting_pulls_toward_best_sample() {
        let cfg = FusionConfig::default();
        // Two valid clusters close enough that neither is an outlier;
        // the high-quality sample should dominate the average.
        let mut a = vec![0.0f32; DIM];
        a[0] = 1.0;
        let mut b = vec![0.0f32; DIM];
        b[0] = 1.0;
        b[1] = 0.6;
        let samples = vec![sample(&a, 0.95), sample(&b, 0.10)];
        let out = fuse(&samples, &cfg, DIM).unwrap();
        assert_eq!(out.outliers_rejected, 0);
        let d_a = out.embedding.euclidean_distance(&Embedding::new(a));
        let d_b = out.embedding.euclidean_distance(&Embedding::new(b));
        assert!(d_a < d_b);
    }

    #[test]
    fn test_outlier_penalty_applied() {
        // Same geometry, different claimed rejection tolerance: when
        // the rejected fraction exceeds the configured maximum the
        // confidence takes the penalty multiplier.
        let strict = FusionConfig { max_outlier_fraction: 0.1, ..FusionConfig::default() };
        let lax = FusionConfig { max_outlier_fraction: 0.9, ..FusionConfig::default() };

        let mut samples = jittered_cluster(4, 1.0, 0.01, 21);
        samples.push(sample(&vec![80.0f32; DIM], 0.9));

        let penalized = fuse(&samples, &strict, DIM).unwrap();
        let unpenalized = fuse(&samples, &lax, DIM).unwrap();
        assert_eq!(penalized.outliers_rejected, 1);
        let expected = unpenalized.confidence * strict.outlier_penalty;
        assert!((penalized.confidence - expected).abs() < 1e-5);
    }

    #[test]
    fn test_fused_norm_matches_input_scale() {
        let cfg = FusionConfig::default();
        let samples = jittered_cluster(5, 1.0, 0.01, 3);
        let mean_norm: f32 =
            samples.iter().map(|s| s.embedding.l2_norm()).sum::<f32>() / samples.len() as f32;
        let out = fuse(&samples, &cfg, DIM).unwrap();
        assert!((out.embedding.l2_norm() - mean_norm).abs() / mean_norm < 0.05);
    }

    #[test]
    fn test_quantile_interpolation() {
        let vals = vec![1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&vals, 0.25) - 1.75).abs() < 1e-6);
        assert!((quantile(&vals, 0.75) - 3.25).abs() < 1e-6);
        assert!((quantile(&vals, 0.5) - 2.5).abs() < 1e-6);
    }
}
