//! assess_frame - assess a single image file or payload and print the result

use anyhow::{Context, Result};
use base64::Engine as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use frame_threat::{Assessor, DetectorHandle, ServiceConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Assess one frame and print the verdict as JSON")]
struct Args {
    /// Image file (JPEG, PNG, WebP, BMP).
    image: Option<PathBuf>,
    /// Raw payload instead of a file: base-64 body or data URL.
    #[arg(long, conflicts_with = "image")]
    payload: Option<String>,
    /// JSON configuration file.
    #[arg(long, env = "FRAME_THREAT_CONFIG")]
    config: Option<PathBuf>,
    /// ONNX model path (overrides configuration).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Confidence threshold (overrides configuration).
    #[arg(long)]
    threshold: Option<f32>,
    /// Compact single-line output.
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = ServiceConfig::load_from(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.detector.model_path = Some(model);
    }
    let threshold = args
        .threshold
        .unwrap_or(config.detector.confidence_threshold);

    let payload = match (&args.image, args.payload) {
        (Some(path), _) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read image {}", path.display()))?;
            Some(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        (None, payload) => payload,
    };

    let policy = config.policy.build_table()?;
    let detector = DetectorHandle::from_settings(&config.detector);
    let assessor = Assessor::new(Arc::new(detector), Arc::new(policy))
        .with_threshold(threshold)
        .context("invalid --threshold")?;

    let result = assessor.assess(payload.as_deref());
    let rendered = if args.compact {
        serde_json::to_string(&result)?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", rendered);
    Ok(())
}
