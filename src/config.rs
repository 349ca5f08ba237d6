//! Configuration loading using Figment.
//!
//! Configuration is layered from:
//! 1. built-in defaults ([`AppConfig::default`])
//! 2. a TOML file (`config/default.toml` unless another path is given)
//! 3. environment variables prefixed with `CAMERA_DAQ_`, with `__` separating
//!    nested keys, e.g. `CAMERA_DAQ_ACQUISITION__FRAME_COUNT=20`
//!
//! # Example
//! ```no_run
//! use camera_daq::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::data::gaussian_fit::LmConfig;
use crate::data::pairing::BackgroundMode;
use crate::data::roi::Roi;
use crate::error::{AppResult, DaqError};
use crate::hardware::{SensorFormat, TriggerMode, MIN_RING_CAPACITY};
use crate::session::{AcquisitionSettings, FitSettings};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CAMERA_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Camera readout settings
    pub camera: CameraSettings,
    /// Acquisition session settings
    pub acquisition: AcquisitionConfig,
    /// Gaussian fit settings
    pub gaussian_fit: GaussianFitConfig,
    /// On-disk store settings
    pub storage: StorageConfig,
    /// Scan mode settings
    pub scan: ScanConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Camera readout configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Sensor readout area
    pub sensor_format: SensorFormat,
    /// Pixel clock in Hz
    pub clock_rate_hz: u32,
    /// Conversion factor (electrons per count, x100)
    pub conversion_factor: u32,
    /// Trigger source
    pub trigger_mode: TriggerMode,
    /// Requested exposure in seconds
    pub exposure_s: f64,
    /// Shortest exposure accepted
    pub exposure_min_s: f64,
    /// Longest exposure accepted
    pub exposure_max_s: f64,
    /// Decimal places the exposure is rounded to
    pub exposure_decimals: u32,
    /// Horizontal binning factor
    pub binning_horizontal: u16,
    /// Vertical binning factor
    pub binning_vertical: u16,
}

impl CameraSettings {
    /// Exposure sent to the camera: rounded to `exposure_decimals`, then clamped into
    /// `[exposure_min_s, exposure_max_s]`.
    pub fn effective_exposure(&self) -> f64 {
        let scale = 10f64.powi(self.exposure_decimals.min(15) as i32);
        let rounded = (self.exposure_s * scale).round() / scale;
        rounded.clamp(self.exposure_min_s, self.exposure_max_s)
    }
}

/// Acquisition session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Background/signal pairs per record session
    pub frame_count: u32,
    /// Upper bound accepted for `frame_count`
    pub max_frame_count: u32,
    /// Region summed into the scalar count
    pub roi: Roi,
    /// Ring buffer slots (at least 4)
    pub ring_buffer_capacity: usize,
    /// Completed-count poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Wait after a software trigger in milliseconds
    pub settle_delay_ms: u64,
    /// Events buffered between poller and consumer
    pub event_capacity: usize,
    /// Background subtraction policy
    pub background: BackgroundMode,
}

/// Gaussian fit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianFitConfig {
    /// Fit each ROI crop
    pub enabled: bool,
    /// Largest ROI pixel count that will be fitted
    pub cpu_limit: usize,
    /// Optimiser iteration cap
    pub max_iterations: usize,
    /// Optimiser convergence tolerance
    pub tolerance: f64,
}

/// On-disk store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Persist processed frames
    pub enabled: bool,
    /// HDF5 file receiving the runs
    pub file_name: PathBuf,
    /// Deflate level (0-9)
    pub compression_level: u8,
}

/// Scan mode configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanConfig {
    /// Schedule used when none is given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "Camera DAQ".to_string(),
                log_level: "info".to_string(),
            },
            camera: CameraSettings {
                sensor_format: SensorFormat::Standard,
                clock_rate_hz: 12_000_000,
                conversion_factor: 100,
                trigger_mode: TriggerMode::Auto,
                exposure_s: 0.001,
                exposure_min_s: 1e-5,
                exposure_max_s: 60.0,
                exposure_decimals: 5,
                binning_horizontal: 1,
                binning_vertical: 1,
            },
            acquisition: AcquisitionConfig {
                frame_count: 10,
                max_frame_count: 100_000,
                roi: Roi {
                    xmin: 0,
                    xmax: 100,
                    ymin: 0,
                    ymax: 100,
                },
                ring_buffer_capacity: 4,
                poll_interval_ms: 1,
                settle_delay_ms: 500,
                event_capacity: 16,
                background: BackgroundMode::Zeroed,
            },
            gaussian_fit: GaussianFitConfig {
                enabled: false,
                cpu_limit: 40_000,
                max_iterations: 100,
                tolerance: 1e-8,
            },
            storage: StorageConfig {
                enabled: true,
                file_name: PathBuf::from("data/images.h5"),
                compression_level: 4,
            },
            scan: ScanConfig::default(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load configuration from `config/default.toml` and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// Missing keys (or a missing file) fall back to the built-in defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Semantic checks not expressible in the types.
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        if !LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        let camera = &self.camera;
        if !(camera.exposure_min_s > 0.0 && camera.exposure_min_s <= camera.exposure_max_s) {
            return invalid(format!(
                "Exposure limits [{}, {}] s are not a valid range",
                camera.exposure_min_s, camera.exposure_max_s
            ));
        }
        if !camera.exposure_s.is_finite() {
            return invalid("exposure_s must be a finite number".into());
        }
        if camera.binning_horizontal == 0 || camera.binning_vertical == 0 {
            return invalid("Binning factors must be at least 1".into());
        }

        let acq = &self.acquisition;
        if acq.frame_count == 0 || acq.frame_count > acq.max_frame_count {
            return invalid(format!(
                "frame_count {} must be within 1..={}",
                acq.frame_count, acq.max_frame_count
            ));
        }
        Roi::new(acq.roi.xmin, acq.roi.xmax, acq.roi.ymin, acq.roi.ymax)
            .map_err(|e| DaqError::Configuration(e.to_string()))?;
        if acq.ring_buffer_capacity < MIN_RING_CAPACITY {
            return invalid(format!(
                "ring_buffer_capacity {} must be at least {}",
                acq.ring_buffer_capacity, MIN_RING_CAPACITY
            ));
        }
        if acq.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be at least 1".into());
        }
        if acq.event_capacity == 0 {
            return invalid("event_capacity must be at least 1".into());
        }

        let fit = &self.gaussian_fit;
        if fit.cpu_limit == 0 || fit.max_iterations == 0 {
            return invalid("gaussian_fit cpu_limit and max_iterations must be positive".into());
        }
        if !(fit.tolerance > 0.0 && fit.tolerance.is_finite()) {
            return invalid(format!("gaussian_fit tolerance {} must be positive", fit.tolerance));
        }

        if self.storage.compression_level > 9 {
            return invalid(format!(
                "Invalid compression_level {}. Must be 0-9",
                self.storage.compression_level
            ));
        }

        Ok(())
    }

    /// Session settings derived from the `[acquisition]` and `[gaussian_fit]` sections.
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        let acq = &self.acquisition;
        AcquisitionSettings {
            ring_buffer_capacity: acq.ring_buffer_capacity,
            poll_interval: Duration::from_millis(acq.poll_interval_ms),
            settle_delay: Duration::from_millis(acq.settle_delay_ms),
            event_capacity: acq.event_capacity,
            background: acq.background,
            fit: FitSettings {
                enabled: self.gaussian_fit.enabled,
                cpu_limit: self.gaussian_fit.cpu_limit,
                lm: LmConfig {
                    max_iterations: self.gaussian_fit.max_iterations,
                    tolerance: self.gaussian_fit.tolerance,
                    ..LmConfig::default()
                },
            },
        }
    }
}
