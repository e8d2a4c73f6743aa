//! Environment overrides for the engine configuration.
//!
//! Deployments start from `EngineConfig::default()` (or a TOML file
//! parsed upstream) and override individual knobs with `ROLLCALL_*`
//! variables.

use rollcall_core::EngineConfig;

/// Apply `ROLLCALL_*` environment overrides to a base configuration.
pub fn from_env(mut cfg: EngineConfig) -> EngineConfig {
    cfg.quality.quality_floor = env_f32("ROLLCALL_QUALITY_FLOOR", cfg.quality.quality_floor);
    cfg.quality.min_face_size_px =
        env_f32("ROLLCALL_MIN_FACE_SIZE_PX", cfg.quality.min_face_size_px);
    cfg.quality.enhancement_ceiling =
        env_f32("ROLLCALL_ENHANCEMENT_CEILING", cfg.quality.enhancement_ceiling);
    cfg.scoring.lenience_k = env_f32("ROLLCALL_LENIENCE_K", cfg.scoring.lenience_k);
    cfg.thresholds.ambiguity_margin =
        env_f32("ROLLCALL_AMBIGUITY_MARGIN", cfg.thresholds.ambiguity_margin);
    cfg.thresholds.ambiguity_override_confidence = env_f32(
        "ROLLCALL_AMBIGUITY_OVERRIDE_CONFIDENCE",
        cfg.thresholds.ambiguity_override_confidence,
    );
    cfg.fusion.outlier_iqr_multiplier =
        env_f32("ROLLCALL_OUTLIER_IQR_MULTIPLIER", cfg.fusion.outlier_iqr_multiplier);
    cfg.fusion.quality_weight_exponent =
        env_f32("ROLLCALL_QUALITY_WEIGHT_EXPONENT", cfg.fusion.quality_weight_exponent);
    cfg.workers = env_usize("ROLLCALL_WORKERS", cfg.workers);
    cfg
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
