//! In-memory frame store.
//!
//! Records what would have been written, keyed by the same layout paths as the HDF5
//! store. Cloned handles share contents, so a test can keep one handle and give the
//! other to the consumer.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{FrameStore, RunDescriptor};
use crate::data::gaussian_fit::GaussianFit;
use crate::error::{AppResult, DaqError};
use crate::session::ProcessedResult;

/// A persisted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFrame {
    /// Layout path, e.g. `run_20240101_000000/image_000001`.
    pub path: String,
    /// Pair index.
    pub sequence_index: u32,
    /// Shape of the stored ROI crop.
    pub shape: (usize, usize),
    /// Stored scalar count attribute.
    pub scalar_count: f64,
    /// Stored fit attributes.
    pub fit: Option<GaussianFit>,
}

#[derive(Debug, Default)]
struct Contents {
    runs: Vec<RunDescriptor>,
    frames: Vec<StoredFrame>,
    fail_on: BTreeSet<u32>,
}

/// Frame store keeping everything in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryFrameStore {
    contents: Arc<Mutex<Contents>>,
    current: Option<RunDescriptor>,
}

impl MemoryFrameStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `append` fail for these pair indices.
    pub fn fail_on(self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.contents.lock().fail_on.extend(indices);
        self
    }

    /// Runs begun so far.
    pub fn runs(&self) -> Vec<RunDescriptor> {
        self.contents.lock().runs.clone()
    }

    /// Frames stored so far, in append order.
    pub fn frames(&self) -> Vec<StoredFrame> {
        self.contents.lock().frames.clone()
    }
}

impl FrameStore for MemoryFrameStore {
    fn begin_run(&mut self, run: &RunDescriptor) -> AppResult<()> {
        self.contents.lock().runs.push(run.clone());
        self.current = Some(run.clone());
        Ok(())
    }

    fn append(&mut self, result: &ProcessedResult) -> AppResult<()> {
        let run = self
            .current
            .as_ref()
            .ok_or_else(|| DaqError::Persistence("no run started".into()))?;

        let mut contents = self.contents.lock();
        if contents.fail_on.contains(&result.sequence_index) {
            return Err(DaqError::Persistence(format!(
                "simulated write failure for frame {}",
                result.sequence_index
            )));
        }
        contents.frames.push(StoredFrame {
            path: run.frame_path(result.sequence_index, result.scan_point()),
            sequence_index: result.sequence_index,
            shape: result.roi_crop.dim(),
            scalar_count: result.scalar_count,
            fit: result.fit,
        });
        Ok(())
    }
}
