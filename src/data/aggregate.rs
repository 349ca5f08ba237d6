//! Statistics aggregation across the pairs of a session.
//!
//! The acquisition loop is mode-agnostic: it feeds every subtracted image and its
//! scalar count to a `Box<dyn Aggregator>` picked at session start by
//! [`aggregator_for`].
//!
//! - [`RunningAggregate`] (record mode) keeps an incremental mean image, weighting the
//!   prior mean by `(n - 1) / n` and the new sample by `1 / n`, plus the mean and standard
//!   error of the scalar counts.
//! - [`GroupedAggregate`] (scan mode) groups scalar counts by the scan parameter value
//!   scheduled for each pair and reports per-value mean and standard error, sorted by
//!   value.
//!
//! Standard error is the population standard deviation divided by `sqrt(n)`.

use std::collections::HashMap;
use std::sync::Arc;

use super::image::ImageGrid;
use super::scan_schedule::{ScanPoint, ScanSchedule};
use crate::error::{AppResult, DaqError};
use crate::session::AcquisitionMode;

/// Per-mode aggregate state after a result.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateSnapshot {
    /// Record mode running statistics.
    Record(RecordSnapshot),
    /// Scan mode grouped statistics.
    Scan(ScanSnapshot),
}

/// Running statistics after `count` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    /// Pairs aggregated.
    pub count: u32,
    /// Mean of all subtracted images so far.
    pub mean_image: ImageGrid,
    /// Mean scalar count.
    pub scalar_mean: f64,
    /// Standard error of the scalar count.
    pub scalar_stderr: f64,
}

/// Grouped statistics after a scan pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSnapshot {
    /// Scan point the latest pair was taken at.
    pub point: ScanPoint,
    /// One row per parameter value, ascending by value.
    pub summary: Vec<ScanSummaryRow>,
}

/// Statistics for one scan parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummaryRow {
    /// Parameter value as scheduled.
    pub label: String,
    /// Numeric parameter value.
    pub value: f64,
    /// Samples in this group.
    pub count: usize,
    /// Mean scalar count.
    pub mean: f64,
    /// Standard error of the scalar count.
    pub stderr: f64,
}

/// Accumulates per-pair measurements.
pub trait Aggregator: Send {
    /// Add the measurement of pair `pair_index` (1-based) and return the updated statistics.
    fn push(
        &mut self,
        pair_index: u32,
        subtracted: &ImageGrid,
        scalar_count: f64,
    ) -> AppResult<AggregateSnapshot>;
}

/// Fresh aggregator for a session in `mode`.
pub fn aggregator_for(mode: &AcquisitionMode) -> Box<dyn Aggregator> {
    match mode {
        AcquisitionMode::Record => Box::new(RunningAggregate::new()),
        AcquisitionMode::Scan(schedule) => Box::new(GroupedAggregate::new(Arc::clone(schedule))),
    }
}

/// Mean and standard error (population std / sqrt(n)) of `values`.
pub fn mean_and_stderr(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt() / n.sqrt())
}

// =============================================================================
// Record mode
// =============================================================================

/// Incremental mean image and scalar statistics.
#[derive(Debug, Default)]
pub struct RunningAggregate {
    count: u32,
    mean_image: Option<ImageGrid>,
    scalars: Vec<f64>,
}

impl RunningAggregate {
    /// Empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs aggregated so far.
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Aggregator for RunningAggregate {
    fn push(
        &mut self,
        _pair_index: u32,
        subtracted: &ImageGrid,
        scalar_count: f64,
    ) -> AppResult<AggregateSnapshot> {
        let n = f64::from(self.count + 1);
        let mean_image = match self.mean_image.take() {
            None => subtracted.clone(),
            Some(prior) if prior.dim() != subtracted.dim() => {
                let message = format!(
                    "image shape {:?} differs from running mean shape {:?}",
                    subtracted.dim(),
                    prior.dim()
                );
                self.mean_image = Some(prior);
                return Err(DaqError::Processing(message));
            }
            Some(prior) => prior * ((n - 1.0) / n) + subtracted * (1.0 / n),
        };

        self.count += 1;
        self.scalars.push(scalar_count);
        self.mean_image = Some(mean_image.clone());

        let (scalar_mean, scalar_stderr) = mean_and_stderr(&self.scalars);
        Ok(AggregateSnapshot::Record(RecordSnapshot {
            count: self.count,
            mean_image,
            scalar_mean,
            scalar_stderr,
        }))
    }
}

// =============================================================================
// Scan mode
// =============================================================================

#[derive(Debug)]
struct ScanGroup {
    value: f64,
    counts: Vec<f64>,
}

/// Scalar counts grouped by scan parameter value.
#[derive(Debug)]
pub struct GroupedAggregate {
    schedule: Arc<ScanSchedule>,
    groups: HashMap<String, ScanGroup>,
}

impl GroupedAggregate {
    /// Empty aggregate over `schedule`.
    pub fn new(schedule: Arc<ScanSchedule>) -> Self {
        Self {
            schedule,
            groups: HashMap::new(),
        }
    }

    /// Per-value statistics, ascending by parameter value.
    pub fn summary(&self) -> Vec<ScanSummaryRow> {
        let mut rows: Vec<ScanSummaryRow> = self
            .groups
            .iter()
            .map(|(label, group)| {
                let (mean, stderr) = mean_and_stderr(&group.counts);
                ScanSummaryRow {
                    label: label.clone(),
                    value: group.value,
                    count: group.counts.len(),
                    mean,
                    stderr,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.value.total_cmp(&b.value).then_with(|| a.label.cmp(&b.label)));
        rows
    }
}

impl Aggregator for GroupedAggregate {
    fn push(
        &mut self,
        pair_index: u32,
        _subtracted: &ImageGrid,
        scalar_count: f64,
    ) -> AppResult<AggregateSnapshot> {
        let point = self
            .schedule
            .point(pair_index)
            .cloned()
            .ok_or(DaqError::UnknownScanIndex(pair_index))?;

        self.groups
            .entry(point.label.clone())
            .or_insert_with(|| ScanGroup {
                value: point.value,
                counts: Vec::new(),
            })
            .counts
            .push(scalar_count);

        Ok(AggregateSnapshot::Scan(ScanSnapshot {
            point,
            summary: self.summary(),
        }))
    }
}
