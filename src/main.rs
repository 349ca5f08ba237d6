//! CLI entry point for camera-daq.
//!
//! Runs acquisition sessions against the simulated ring-buffer camera:
//! - `record`: running average over N background/signal pairs
//! - `scan`: one pair per scan schedule entry, grouped by parameter value
//! - `check-config`: load and validate the configuration without acquiring
//!
//! # Usage
//!
//! ```bash
//! camera-daq record --frames 50
//! camera-daq scan --schedule config/scan_schedule.toml --no-save
//! CAMERA_DAQ_GAUSSIAN_FIT__ENABLED=true camera-daq record
//! ```
//!
//! Ctrl+C stops a running session; the pair in flight is discarded.

use anyhow::{bail, Context, Result};
use camera_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use camera_daq::data::scan_schedule::ScanSchedule;
use camera_daq::hardware::mock::{FramePattern, MockCameraConfig, MockRingBufferCamera};
use camera_daq::hardware::{apply_camera_settings, RingBufferAcquisition};
use camera_daq::session::consumer::{AcquisitionConsumer, LoggingSink, SessionReport};
use camera_daq::session::{AcquisitionMode, SessionController, SessionEnd};
use camera_daq::storage::hdf5_writer::Hdf5FrameStore;
use camera_daq::storage::{FrameStore, RunDescriptor};
use camera_daq::tracing_setup;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "camera-daq")]
#[command(about = "Ring-buffer camera acquisition with background subtraction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture background/signal pairs and keep a running average
    Record {
        /// Number of pairs (defaults to acquisition.frame_count)
        #[arg(long)]
        frames: Option<u32>,

        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Do not write frames to disk
        #[arg(long)]
        no_save: bool,
    },

    /// Capture one pair per schedule entry and group by parameter value
    Scan {
        /// Scan schedule file (defaults to scan.schedule_file)
        #[arg(long)]
        schedule: Option<PathBuf>,

        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Do not write frames to disk
        #[arg(long)]
        no_save: bool,
    },

    /// Load and validate the configuration, then exit
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            frames,
            config,
            no_save,
        } => {
            let config = load_config(&config)?;
            let frame_count = frames.unwrap_or(config.acquisition.frame_count);
            if frame_count > config.acquisition.max_frame_count {
                bail!(
                    "{} pairs requested, acquisition.max_frame_count is {}",
                    frame_count,
                    config.acquisition.max_frame_count
                );
            }
            run_session(&config, AcquisitionMode::Record, frame_count, !no_save).await
        }
        Commands::Scan {
            schedule,
            config,
            no_save,
        } => {
            let config = load_config(&config)?;
            let path = schedule
                .or_else(|| config.scan.schedule_file.clone())
                .context("no scan schedule given and scan.schedule_file is unset")?;
            let schedule = ScanSchedule::load(&path)
                .with_context(|| format!("loading scan schedule {}", path.display()))?;
            let frame_count =
                u32::try_from(schedule.len()).context("scan schedule has too many entries")?;
            info!(
                device = schedule.device(),
                parameter = schedule.parameter(),
                points = frame_count,
                "Scan schedule loaded"
            );
            run_session(
                &config,
                AcquisitionMode::Scan(Arc::new(schedule)),
                frame_count,
                !no_save,
            )
            .await
        }
        Commands::CheckConfig { config } => {
            let config = load_config(&config)?;
            println!("Configuration OK");
            println!(
                "  camera:      {:?}, exposure {} s",
                config.camera.sensor_format,
                config.camera.effective_exposure()
            );
            println!("  frames:      {}", config.acquisition.frame_count);
            println!("  roi:         {:?}", config.acquisition.roi);
            println!("  background:  {:?}", config.acquisition.background);
            println!("  fit:         {}", config.gaussian_fit.enabled);
            println!("  storage:     {}", config.storage.file_name.display());
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("loading configuration {}", path.display()))?;
    config.validate()?;
    tracing_setup::init_from_config(&config)?;
    Ok(config)
}

async fn run_session(
    config: &AppConfig,
    mode: AcquisitionMode,
    frame_count: u32,
    save: bool,
) -> Result<()> {
    let mut camera = MockRingBufferCamera::new(MockCameraConfig::default());
    apply_camera_settings(&mut camera, &config.camera)?;
    let (nx, ny) = camera.image_shape();
    let camera = camera.with_pattern(FramePattern::centered_spot(nx, ny));

    let mut controller = SessionController::new(Box::new(camera), config.acquisition_settings());
    let events = controller.start(mode, frame_count, config.acquisition.roi)?;
    let run = controller
        .session()
        .map(RunDescriptor::starting_now)
        .context("session was not recorded")?;

    let mut consumer = AcquisitionConsumer::new(LoggingSink::new());
    if save {
        if let Some(store) = open_store(config) {
            consumer = consumer.with_store(store);
        }
    }

    let mut consumer_task = tokio::spawn(consumer.run(run, events));
    let report = tokio::select! {
        joined = &mut consumer_task => joined?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping session");
            controller.stop();
            consumer_task.await?
        }
    };

    controller.close().await?;
    summarize(report)
}

fn open_store(config: &AppConfig) -> Option<Box<dyn FrameStore>> {
    if !cfg!(feature = "storage_hdf5") {
        warn!("Built without the storage_hdf5 feature, frames will not be saved");
        return None;
    }
    Some(Box::new(Hdf5FrameStore::new(
        &config.storage.file_name,
        config.storage.compression_level,
    )))
}

fn summarize(report: SessionReport) -> Result<()> {
    info!(
        backgrounds = report.backgrounds,
        persisted = report.persisted,
        persistence_failures = report.persistence_failures,
        "Session report"
    );
    match report.end {
        Some(SessionEnd::Aborted { pairs, error }) => {
            Err(anyhow::Error::new(error).context(format!("session aborted after {} pairs", pairs)))
        }
        Some(_) => Ok(()),
        None => bail!("session ended without a final event"),
    }
}
