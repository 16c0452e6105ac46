//! camwatchd - camera watch daemon
//!
//! This daemon:
//! 1. Captures frames from the configured source on a background thread,
//!    reconnecting forever on failure
//! 2. Runs the object detector on every frame
//! 3. Tracks whether the camera view is obscured
//! 4. Records segments while objects are being detected

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use camwatch::{
    build_detector, CamwatchConfig, FrameSource, Monitor, SegmentRecorder, ShutdownSignal,
    TamperDetector,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "CAMWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Stream identifier, overrides the config file.
    #[arg(long)]
    source: Option<String>,
    /// 0: warnings only, 1: info, 2: debug.
    #[arg(long)]
    verbose: Option<u8>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = CamwatchConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        config.set_source(source);
    }
    if let Some(verbose) = args.verbose {
        config.verbose = verbose;
    }
    config.validate()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_filter()))
        .init();

    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.trigger()).context("error setting Ctrl-C handler")?;
    }

    let detector = build_detector(&config.detector)?;
    let tamper = if config.tamper_enabled {
        Some(TamperDetector::with_orb(config.tamper.clone())?)
    } else {
        None
    };
    let recorder = if config.recording_enabled {
        Some(SegmentRecorder::with_mjpeg(config.recording.clone())?)
    } else {
        None
    };

    log::info!(
        "camwatchd {} watching {} ({}x{}), detector={}, tamper_check={}, recording={}",
        env!("CARGO_PKG_VERSION"),
        config.source,
        config.frame_width,
        config.frame_height,
        detector.name(),
        config.tamper_enabled,
        config.recording_enabled
    );
    if config.recording_enabled {
        log::info!("recordings go to {}", config.recording.outdir.display());
    }

    let source = FrameSource::spawn(config.capture_config(), config.opener(), &shutdown)?;
    let mut monitor = Monitor::new(config.monitor_config(), detector, tamper, recorder);

    monitor.run(&source, &shutdown);

    log::info!("shutdown signal received, stopping capture...");
    source.stop();
    Ok(())
}
