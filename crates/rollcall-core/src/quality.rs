//! Quality Assessor.
//!
//! Scores one face crop for usability: sharpness (Laplacian variance),
//! size (bounding-box area), brightness (distance from mid-gray), and
//! contrast (luminance spread), combined as a weighted sum in [0, 1].
//! Pure function of the pixel data and configuration — identical input
//! always yields a bit-identical score.

use serde::Serialize;

use crate::config::QualityConfig;
use crate::types::{BoundingBox, FaceCrop};

/// Per-component sub-scores, each already normalized to [0, 1].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QualityBreakdown {
    pub sharpness: f32,
    pub size: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub composite: f32,
}

/// Assess a face crop. Returns the composite score in [0, 1].
pub fn assess(crop: &FaceCrop, bbox: &BoundingBox, cfg: &QualityConfig) -> f32 {
    breakdown(crop, bbox, cfg).composite
}

/// Assess a face crop, keeping the per-component sub-scores.
pub fn breakdown(crop: &FaceCrop, bbox: &BoundingBox, cfg: &QualityConfig) -> QualityBreakdown {
    let (mean, stddev) = luminance_stats(&crop.data);

    let sharpness = (laplacian_variance(crop) / cfg.sharpness_ceiling).clamp(0.0, 1.0);
    let size = (bbox.area() / cfg.good_face_area_px).clamp(0.0, 1.0);
    let brightness =
        (1.0 - (mean - cfg.brightness_target).abs() / cfg.brightness_target).clamp(0.0, 1.0);
    let contrast = (stddev / cfg.contrast_ceiling).clamp(0.0, 1.0);

    let composite = (cfg.sharpness_weight * sharpness
        + cfg.size_weight * size
        + cfg.brightness_weight * brightness
        + cfg.contrast_weight * contrast)
        .clamp(0.0, 1.0);

    QualityBreakdown { sharpness, size, brightness, contrast, composite }
}

/// Mean and standard deviation of the crop's luminance.
fn luminance_stats(data: &[u8]) -> (f32, f32) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let n = data.len() as f64;
    let sum: f64 = data.iter().map(|&p| p as f64).sum();
    let mean = sum / n;
    let var: f64 = data.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean as f32, var.sqrt() as f32)
}

/// Variance of the 3x3 Laplacian response over interior pixels.
///
/// Flat regions respond near zero; edges and texture drive the
/// variance up. Crops smaller than 3x3 score zero.
fn laplacian_variance(crop: &FaceCrop) -> f32 {
    let w = crop.width as usize;
    let h = crop.height as usize;
    if w < 3 || h < 3 || crop.data.len() < w * h {
        return 0.0;
    }

    let px = |x: usize, y: usize| crop.data[y * w + x] as f64;

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let response = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1)
                - 4.0 * px(x, y);
            sum += response;
            sum_sq += response * response;
            count += 1;
        }
    }

    let n = count as f64;
    let mean = sum / n;
    ((sum_sq / n) - mean * mean).max(0.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_crop(size: u32, value: u8) -> FaceCrop {
        FaceCrop {
            width: size,
            height: size,
            data: vec![value; (size * size) as usize],
        }
    }

    fn checkerboard_crop(size: u32) -> FaceCrop {
        let mut data = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                data.push(if (x + y) % 2 == 0 { 0 } else { 255 });
            }
        }
        FaceCrop { width: size, height: size, data }
    }

    fn bbox(side: f32) -> BoundingBox {
        BoundingBox { x: 0.0, y: 0.0, width: side, height: side }
    }

    #[test]
    fn test_flat_mid_gray_scores_brightness_only() {
        let cfg = QualityConfig::default();
        let b = breakdown(&flat_crop(64, 128), &bbox(64.0), &cfg);
        assert_eq!(b.sharpness, 0.0);
        assert_eq!(b.contrast, 0.0);
        assert!(b.brightness > 0.99);
        assert!((b.size - 64.0 * 64.0 / cfg.good_face_area_px).abs() < 1e-6);
    }

    #[test]
    fn test_checkerboard_maxes_sharpness_and_contrast() {
        let cfg = QualityConfig::default();
        let b = breakdown(&checkerboard_crop(64), &bbox(120.0), &cfg);
        assert_eq!(b.sharpness, 1.0);
        assert_eq!(b.contrast, 1.0);
        assert_eq!(b.size, 1.0);
        // Mean is ~127.5, essentially mid-gray.
        assert!(b.brightness > 0.99);
        assert!(b.composite > 0.99);
    }

    #[test]
    fn test_dark_crop_penalized_on_brightness() {
        let cfg = QualityConfig::default();
        let dark = breakdown(&flat_crop(64, 10), &bbox(64.0), &cfg);
        let mid = breakdown(&flat_crop(64, 128), &bbox(64.0), &cfg);
        assert!(dark.brightness < 0.1);
        assert!(dark.composite < mid.composite);
    }

    #[test]
    fn test_size_clamped_at_good_area() {
        let cfg = QualityConfig::default();
        let b = breakdown(&flat_crop(8, 128), &bbox(500.0), &cfg);
        assert_eq!(b.size, 1.0);
    }

    #[test]
    fn test_deterministic_bit_for_bit() {
        let cfg = QualityConfig::default();
        let crop = checkerboard_crop(48);
        let bb = bbox(48.0);
        let a = assess(&crop, &bb, &cfg);
        let b = assess(&crop, &bb, &cfg);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_rejection_idempotent() {
        let cfg = QualityConfig::default();
        let crop = flat_crop(40, 128);
        let bb = bbox(40.0);
        let first = assess(&crop, &bb, &cfg) < cfg.quality_floor;
        let second = assess(&crop, &bb, &cfg) < cfg.quality_floor;
        assert_eq!(first, second);
    }

    #[test]
    fn test_tiny_crop_zero_sharpness() {
        let crop = FaceCrop { width: 2, height: 2, data: vec![0, 255, 255, 0] };
        assert_eq!(laplacian_variance(&crop), 0.0);
    }
}
