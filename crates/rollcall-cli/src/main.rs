use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rollcall_core::{
    quality, BoundingBox, EngineConfig, EnrollmentSample, FaceCrop, FaceObservation, MatchEngine,
    ReferenceProfile, RosterSnapshot,
};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance match-decision CLI")]
struct Cli {
    /// Engine configuration file (TOML); defaults apply when absent.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fuse enrollment samples into a reference profile and upsert it
    /// into a roster file
    Enroll {
        /// Student identifier
        #[arg(short, long)]
        student_id: String,
        /// JSON file holding a list of enrollment samples
        samples: PathBuf,
        /// Roster JSON file to update (created if missing)
        #[arg(short, long)]
        roster: PathBuf,
    },
    /// Decide every face in a photo against a roster
    Match {
        /// Roster JSON file (list of reference profiles)
        roster: PathBuf,
        /// JSON file holding the photo's face observations
        faces: PathBuf,
    },
    /// Score an image crop's quality and print the breakdown
    Quality {
        /// Image file (any format the image crate reads)
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll { student_id, samples, roster } => enroll(config, &student_id, &samples, &roster),
        Commands::Match { roster, faces } => match_photo(config, &roster, &faces),
        Commands::Quality { image } => quality_report(config, &image),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing config {}", p.display()))
        }
        None => Ok(EngineConfig::default()),
    }
}

fn enroll(config: EngineConfig, student_id: &str, samples_path: &Path, roster_path: &Path) -> Result<()> {
    let samples: Vec<EnrollmentSample> = read_json(samples_path)?;
    let engine = MatchEngine::new(config);

    let profile = engine
        .register_student(student_id, &samples)
        .with_context(|| format!("fusing {} samples for {student_id}", samples.len()))?;

    let mut profiles: Vec<ReferenceProfile> = if roster_path.exists() {
        read_json(roster_path)?
    } else {
        Vec::new()
    };
    // Re-registration replaces the profile wholesale.
    profiles.retain(|p| p.student_id != student_id);
    profiles.push(profile.clone());
    fs::write(roster_path, serde_json::to_vec_pretty(&profiles)?)
        .with_context(|| format!("writing roster {}", roster_path.display()))?;

    println!(
        "{}",
        serde_json::json!({
            "student_id": profile.student_id,
            "enrollment_confidence": profile.enrollment_confidence,
            "sample_count": profile.sample_count,
            "roster_size": profiles.len(),
        })
    );
    Ok(())
}

fn match_photo(config: EngineConfig, roster_path: &Path, faces_path: &Path) -> Result<()> {
    let profiles: Vec<ReferenceProfile> = read_json(roster_path)?;
    let faces: Vec<FaceObservation> = read_json(faces_path)?;

    let dim = config.encoder.embedding_dim();
    let engine = MatchEngine::new(config);
    let snapshot = RosterSnapshot::new(profiles, dim).context("building roster snapshot")?;

    let decisions = engine
        .match_photo(&snapshot, &faces)
        .context("deciding photo")?;

    let matched = decisions.iter().filter(|d| d.student_id.is_some()).count();
    let rejected = decisions
        .iter()
        .filter(|d| {
            matches!(
                d.reason.code(),
                "no_embedding" | "low_quality" | "too_small"
            )
        })
        .count();
    tracing::info!(faces = decisions.len(), matched, rejected, "photo decided");

    println!("{}", serde_json::to_string_pretty(&decisions)?);
    Ok(())
}

fn quality_report(config: EngineConfig, image_path: &Path) -> Result<()> {
    let img = image::open(image_path)
        .with_context(|| format!("opening {}", image_path.display()))?
        .to_luma8();

    let (width, height) = img.dimensions();
    let crop = FaceCrop { width, height, data: img.into_raw() };
    let bbox = BoundingBox { x: 0.0, y: 0.0, width: width as f32, height: height as f32 };

    let breakdown = quality::breakdown(&crop, &bbox, &config.quality);
    let verdict = if breakdown.composite < config.quality.quality_floor {
        "reject"
    } else if breakdown.composite < config.quality.enhancement_ceiling {
        "enhance"
    } else {
        "accept"
    };

    println!(
        "{}",
        serde_json::json!({
            "quality": breakdown,
            "verdict": verdict,
        })
    );
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
