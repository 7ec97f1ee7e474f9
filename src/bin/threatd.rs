//! threatd - frame threat assessment service
//!
//! This daemon:
//! 1. Loads the service configuration and policy table
//! 2. Loads the detector model once (failure leaves the service in
//!    "always SAFE, model not loaded" mode rather than exiting)
//! 3. Serves the analyze and health endpoints until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use frame_threat::{
    api::{ApiConfig, ApiServer},
    Assessor, Detection, DetectorHandle, ServiceConfig, StubBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Frame threat assessment service")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "FRAME_THREAT_CONFIG")]
    config: Option<PathBuf>,
    /// Listen address (overrides configuration).
    #[arg(long)]
    addr: Option<String>,
    /// Serve with a scripted detector that reports the given labels
    /// (comma separated, confidence 1.0). For wiring checks without a model.
    #[arg(long)]
    stub_labels: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServiceConfig::load_from(args.config.as_deref())?;
    let policy = config
        .policy
        .build_table()
        .context("failed to build threat policy table")?;
    log::info!("threat policy loaded with {} labels", policy.len());

    let detector = match &args.stub_labels {
        Some(labels) => {
            log::warn!("serving with stub detector; verdicts are not real");
            let detections = labels
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(|label| Detection::new(label, 1.0))
                .collect();
            DetectorHandle::ready(StubBackend::new(detections))
        }
        None => DetectorHandle::from_settings(&config.detector),
    };
    if let Some(reason) = detector.unavailable_reason() {
        log::warn!("detector unavailable ({}); answering every frame SAFE", reason);
    }

    let assessor = Assessor::new(Arc::new(detector), Arc::new(policy))
        .with_threshold(config.detector.confidence_threshold)?;
    log::info!(
        "confidence threshold set to {}",
        assessor.confidence_threshold()
    );

    let api_config = ApiConfig {
        addr: args.addr.unwrap_or_else(|| config.api_addr.clone()),
        max_body_bytes: config.max_body_bytes,
    };
    let api_handle = ApiServer::new(api_config, Arc::new(assessor)).spawn()?;
    log::info!("assessment api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("threatd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
