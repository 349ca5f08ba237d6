//! Acquisition sessions.
//!
//! A session captures `frame_count` background/signal pairs from the camera. The
//! [`SessionController`] arms the device and launches the [`poller`] on a blocking
//! thread; the poller pairs frames, runs the per-pair [`pipeline`] and sends
//! [`AcquisitionEvent`]s over a bounded channel to a single consumer
//! ([`consumer::AcquisitionConsumer`] persists and displays them). Every session
//! stream ends with exactly one [`AcquisitionEvent::Finished`].
//!
//! ```text
//! camera ring buffer -> poller -> pairer -> ROI -> aggregator (+ fit) -> channel -> consumer
//! ```

pub mod consumer;
mod controller;
mod events;
pub mod pipeline;
mod poller;

use std::sync::Arc;
use std::time::Duration;

use crate::data::gaussian_fit::LmConfig;
use crate::data::pairing::BackgroundMode;
use crate::data::roi::Roi;
use crate::data::scan_schedule::ScanSchedule;

pub use controller::SessionController;
pub use events::{AcquisitionEvent, ProcessedResult, SessionEnd};

/// How pairs are aggregated.
#[derive(Debug, Clone)]
pub enum AcquisitionMode {
    /// Running average over all pairs.
    Record,
    /// Statistics grouped by the scheduled scan parameter value.
    Scan(Arc<ScanSchedule>),
}

impl AcquisitionMode {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            AcquisitionMode::Record => "record",
            AcquisitionMode::Scan(_) => "scan",
        }
    }
}

/// Parameters of the session most recently started.
#[derive(Debug, Clone)]
pub struct Session {
    /// Aggregation mode.
    pub mode: AcquisitionMode,
    /// Pairs to capture.
    pub target_frame_count: u32,
    /// ROI applied to every subtracted frame.
    pub roi: Roi,
    /// Whether the Gaussian fit runs (enabled and within budget).
    pub fit_enabled: bool,
}

/// Gaussian fit settings.
#[derive(Debug, Clone)]
pub struct FitSettings {
    /// Fit requested.
    pub enabled: bool,
    /// Largest ROI area (pixels) that is fitted.
    pub cpu_limit: usize,
    /// Optimiser settings.
    pub lm: LmConfig,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cpu_limit: 40_000,
            lm: LmConfig::default(),
        }
    }
}

/// Runtime settings fixed at controller construction.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Ring buffer slots requested when arming (raised to at least 4).
    pub ring_buffer_capacity: usize,
    /// Sleep between completed-count polls.
    pub poll_interval: Duration,
    /// Wait after each software trigger.
    pub settle_delay: Duration,
    /// Bound of the event channel.
    pub event_capacity: usize,
    /// Background subtraction policy.
    pub background: BackgroundMode,
    /// Gaussian fit settings.
    pub fit: FitSettings,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            ring_buffer_capacity: 4,
            poll_interval: Duration::from_millis(1),
            settle_delay: Duration::from_millis(500),
            event_capacity: 16,
            background: BackgroundMode::Zeroed,
            fit: FitSettings::default(),
        }
    }
}
