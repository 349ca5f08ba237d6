use std::sync::Arc;

use crate::data::aggregate::AggregateSnapshot;
use crate::data::gaussian_fit::GaussianFit;
use crate::data::image::ImageGrid;
use crate::data::pairing::CapturedFrame;
use crate::data::roi::Roi;
use crate::data::scan_schedule::ScanPoint;
use crate::error::DaqError;

/// Outcome of one background/signal pair. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct ProcessedResult {
    /// 1-based pair index.
    pub sequence_index: u32,
    /// Raw signal frame.
    pub signal: Arc<CapturedFrame>,
    /// `signal - background`.
    pub subtracted_image: ImageGrid,
    /// ROI the crop was taken from.
    pub roi: Roi,
    /// Subtracted image restricted to the ROI.
    pub roi_crop: ImageGrid,
    /// Sum of `roi_crop`.
    pub scalar_count: f64,
    /// Aggregate statistics including this pair.
    pub aggregate: AggregateSnapshot,
    /// Gaussian fit of `roi_crop`, in crop coordinates.
    pub fit: Option<GaussianFit>,
}

impl ProcessedResult {
    /// Scan point of this pair, in scan mode.
    pub fn scan_point(&self) -> Option<&ScanPoint> {
        match &self.aggregate {
            AggregateSnapshot::Scan(scan) => Some(&scan.point),
            AggregateSnapshot::Record(_) => None,
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// All requested pairs were captured.
    Completed {
        /// Pairs emitted.
        pairs: u32,
    },
    /// `stop()` was called, or the consumer went away.
    Stopped {
        /// Pairs emitted before stopping.
        pairs: u32,
    },
    /// A device fault, schedule error or processing failure ended the session.
    Aborted {
        /// Pairs emitted before the failure.
        pairs: u32,
        /// Cause.
        error: DaqError,
    },
}

impl SessionEnd {
    /// Pairs emitted during the session.
    pub fn pairs(&self) -> u32 {
        match self {
            SessionEnd::Completed { pairs }
            | SessionEnd::Stopped { pairs }
            | SessionEnd::Aborted { pairs, .. } => *pairs,
        }
    }

    /// Whether every requested pair was captured.
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionEnd::Completed { .. })
    }
}

/// Message from the poller to the consumer.
#[derive(Debug)]
pub enum AcquisitionEvent {
    /// A background frame was read out (as used for subtraction).
    BackgroundCaptured(Arc<CapturedFrame>),
    /// A pair was processed.
    Processed(Arc<ProcessedResult>),
    /// Last event of every session.
    Finished(SessionEnd),
}
