//! Face Enhancer.
//!
//! Preprocessing for borderline-quality crops before re-encoding:
//! luminance histogram equalization, mild unsharp-mask sharpening,
//! then light median denoising. Runs only when quality sits between
//! the hard floor and the "good enough" ceiling — clean crops must
//! not be touched, and crops below the floor are already rejected.
//! Output has identical dimensions to the input.

use crate::config::QualityConfig;
use crate::types::FaceCrop;

/// Unsharp-mask amount. Kept mild so sharpening never invents edges
/// the encoder would read as identity signal.
const UNSHARP_AMOUNT: f32 = 0.5;

/// True when a crop with this quality should be enhanced.
pub fn should_enhance(quality: f32, cfg: &QualityConfig) -> bool {
    quality >= cfg.quality_floor && quality < cfg.enhancement_ceiling
}

/// Produce an enhanced copy of a borderline crop.
pub fn enhance(crop: &FaceCrop) -> FaceCrop {
    let equalized = equalize_histogram(&crop.data);
    let sharpened = unsharp_mask(&equalized, crop.width as usize, crop.height as usize);
    let denoised = median_3x3(&sharpened, crop.width as usize, crop.height as usize);
    FaceCrop {
        width: crop.width,
        height: crop.height,
        data: denoised,
    }
}

/// Standard CDF-based histogram equalization on the luminance channel.
fn equalize_histogram(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }

    let mut hist = [0usize; 256];
    for &p in data {
        hist[p as usize] += 1;
    }

    let mut cdf = [0usize; 256];
    let mut running = 0usize;
    for (i, &count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }

    // First non-zero CDF value anchors the remap so the darkest
    // occupied bin maps to 0.
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let total = data.len();
    if total == cdf_min {
        // Single-valued image; nothing to equalize.
        return data.to_vec();
    }

    let mut lut = [0u8; 256];
    for i in 0..256 {
        let num = cdf[i].saturating_sub(cdf_min) as f32;
        let den = (total - cdf_min) as f32;
        lut[i] = (num / den * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    data.iter().map(|&p| lut[p as usize]).collect()
}

/// 3x3 Gaussian blur (kernel 1-2-1 / 16), edges clamped.
fn gaussian_3x3(data: &[u8], w: usize, h: usize) -> Vec<f32> {
    let px = |x: i64, y: i64| -> f32 {
        let xc = x.clamp(0, w as i64 - 1) as usize;
        let yc = y.clamp(0, h as i64 - 1) as usize;
        data[yc * w + xc] as f32
    };

    let mut out = vec![0.0f32; w * h];
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut acc = 0.0f32;
            for (dy, wy) in [(-1i64, 1.0f32), (0, 2.0), (1, 1.0)] {
                for (dx, wx) in [(-1i64, 1.0f32), (0, 2.0), (1, 1.0)] {
                    acc += wy * wx * px(x + dx, y + dy);
                }
            }
            out[y as usize * w + x as usize] = acc / 16.0;
        }
    }
    out
}

/// Unsharp mask: `out = orig + amount * (orig - blurred)`.
fn unsharp_mask(data: &[u8], w: usize, h: usize) -> Vec<u8> {
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let blurred = gaussian_3x3(data, w, h);
    data.iter()
        .zip(blurred.iter())
        .map(|(&orig, &blur)| {
            let v = orig as f32 + UNSHARP_AMOUNT * (orig as f32 - blur);
            v.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// 3x3 median filter, edges clamped. Light denoise that preserves
/// edges better than a second blur pass would.
fn median_3x3(data: &[u8], w: usize, h: usize) -> Vec<u8> {
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let px = |x: i64, y: i64| -> u8 {
        let xc = x.clamp(0, w as i64 - 1) as usize;
        let yc = y.clamp(0, h as i64 - 1) as usize;
        data[yc * w + xc]
    };

    let mut out = vec![0u8; w * h];
    let mut window = [0u8; 9];
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let mut i = 0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    window[i] = px(x + dx, y + dy);
                    i += 1;
                }
            }
            window.sort_unstable();
            out[y as usize * w + x as usize] = window[4];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;

    #[test]
    fn test_gating_band() {
        let cfg = QualityConfig::default();
        assert!(!should_enhance(cfg.quality_floor - 0.01, &cfg));
        assert!(should_enhance(cfg.quality_floor, &cfg));
        assert!(should_enhance(0.45, &cfg));
        assert!(!should_enhance(cfg.enhancement_ceiling, &cfg));
        assert!(!should_enhance(0.95, &cfg));
    }

    #[test]
    fn test_output_dimensions_preserved() {
        let crop = FaceCrop { width: 17, height: 23, data: vec![90; 17 * 23] };
        let out = enhance(&crop);
        assert_eq!(out.width, 17);
        assert_eq!(out.height, 23);
        assert_eq!(out.data.len(), 17 * 23);
    }

    #[test]
    fn test_equalization_expands_narrow_range() {
        // Values squeezed into [100, 140] should spread toward [0, 255].
        let data: Vec<u8> = (0..4096).map(|i| 100 + (i % 41) as u8).collect();
        let eq = equalize_histogram(&data);
        let min = *eq.iter().min().unwrap();
        let max = *eq.iter().max().unwrap();
        assert_eq!(min, 0);
        assert!(max >= 250);
    }

    #[test]
    fn test_equalization_constant_image_unchanged() {
        let data = vec![77u8; 256];
        assert_eq!(equalize_histogram(&data), data);
    }

    #[test]
    fn test_unsharp_amplifies_edge() {
        // Vertical step edge: sharpening pushes the two sides apart.
        let w = 8;
        let h = 8;
        let mut data = vec![0u8; w * h];
        for y in 0..h {
            for x in 4..w {
                data[y * w + x] = 200;
            }
        }
        let out = unsharp_mask(&data, w, h);
        // Pixel just right of the edge gets brighter than the plateau.
        assert!(out[3 * w + 4] >= 200);
        // Pixel just left of the edge is pushed toward zero (already 0).
        assert_eq!(out[3 * w + 3], 0);
    }

    #[test]
    fn test_median_removes_salt_noise() {
        let w = 9;
        let h = 9;
        let mut data = vec![100u8; w * h];
        data[4 * w + 4] = 255; // lone hot pixel
        let out = median_3x3(&data, w, h);
        assert_eq!(out[4 * w + 4], 100);
    }

    #[test]
    fn test_enhance_deterministic() {
        let data: Vec<u8> = (0..64 * 64).map(|i| ((i * 7) % 251) as u8).collect();
        let crop = FaceCrop { width: 64, height: 64, data };
        assert_eq!(enhance(&crop).data, enhance(&crop).data);
    }
}
