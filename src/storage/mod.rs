//! Persistence of processed frames.
//!
//! Every processed pair is appended to a hierarchical store:
//!
//! ```text
//! run_<YYYYmmdd_HHMMSS>/                 run attributes: frame count, scan metadata
//!     [<parameter>_<value>/]             scan mode only: parameter, value, unit
//!         image_<seq:06>                 ROI crop, compressed; scalar count and fit attributes
//! ```
//!
//! [`FrameStore`] is the seam between the consumer and a concrete backend:
//! [`hdf5_writer::Hdf5FrameStore`] for files, [`memory::MemoryFrameStore`] for tests.

pub mod hdf5_writer;
pub mod memory;

use chrono::{DateTime, Local};

use crate::data::roi::Roi;
use crate::data::scan_schedule::ScanPoint;
use crate::error::AppResult;
use crate::session::{AcquisitionMode, ProcessedResult, Session};

/// Append-only destination for processed frames.
pub trait FrameStore: Send {
    /// Create the run container. Called once before the first frame.
    fn begin_run(&mut self, run: &RunDescriptor) -> AppResult<()>;

    /// Persist one processed frame as its own transaction.
    fn append(&mut self, result: &ProcessedResult) -> AppResult<()>;
}

/// Scanned parameter description stored with a scan run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMetadata {
    /// Device whose parameter is scanned.
    pub device: String,
    /// Parameter name.
    pub parameter: String,
    /// Parameter unit.
    pub unit: String,
}

/// Everything the store needs to know about a run before frames arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDescriptor {
    /// Run group name, `run_<timestamp>`.
    pub name: String,
    /// Pairs requested for the session.
    pub frame_count: u32,
    /// ROI applied to every frame.
    pub roi: Roi,
    /// Present for scan sessions.
    pub scan: Option<ScanMetadata>,
}

impl RunDescriptor {
    /// Describe `session`, started at `started_at`.
    pub fn new(session: &Session, started_at: &DateTime<Local>) -> Self {
        let scan = match &session.mode {
            AcquisitionMode::Record => None,
            AcquisitionMode::Scan(schedule) => Some(ScanMetadata {
                device: schedule.device().to_string(),
                parameter: schedule.parameter().to_string(),
                unit: schedule.unit().to_string(),
            }),
        };
        Self {
            name: run_group_name(started_at),
            frame_count: session.target_frame_count,
            roi: session.roi,
            scan,
        }
    }

    /// Describe `session`, started now.
    pub fn starting_now(session: &Session) -> Self {
        Self::new(session, &Local::now())
    }

    /// Path of a frame within the store, relative to its root.
    pub fn frame_path(&self, sequence_index: u32, point: Option<&ScanPoint>) -> String {
        match (&self.scan, point) {
            (Some(scan), Some(point)) => format!(
                "{}/{}/{}",
                self.name,
                scan_group_name(&scan.parameter, &point.label),
                dataset_name(sequence_index)
            ),
            _ => format!("{}/{}", self.name, dataset_name(sequence_index)),
        }
    }
}

/// `run_<YYYYmmdd_HHMMSS>`
pub fn run_group_name(started_at: &DateTime<Local>) -> String {
    format!("run_{}", started_at.format("%Y%m%d_%H%M%S"))
}

/// `<parameter>_<value>`
pub fn scan_group_name(parameter: &str, label: &str) -> String {
    format!("{}_{}", parameter, label)
}

/// `image_<seq:06>`
pub fn dataset_name(sequence_index: u32) -> String {
    format!("image_{:06}", sequence_index)
}
