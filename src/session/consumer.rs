//! Consumer end of the event channel.
//!
//! Receives every event of one session, forwards it to a [`ResultSink`] for display and
//! appends processed results to an optional [`FrameStore`]. Store calls run on the
//! blocking pool so slow disk I/O never stalls the runtime. A failed write is logged and
//! counted; the session carries on and only that frame's on-disk copy is lost.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::events::{AcquisitionEvent, ProcessedResult, SessionEnd};
use crate::data::aggregate::AggregateSnapshot;
use crate::data::pairing::CapturedFrame;
use crate::error::{AppResult, DaqError};
use crate::storage::{FrameStore, RunDescriptor};

/// Display side of a session.
pub trait ResultSink: Send {
    /// A background frame was captured.
    fn background(&mut self, _frame: &CapturedFrame) {}

    /// A pair was processed.
    fn result(&mut self, result: &ProcessedResult);

    /// The session ended.
    fn finished(&mut self, _end: &SessionEnd) {}
}

/// Sink that reports results through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingSink {
    last_aggregate: Option<AggregateSnapshot>,
}

impl LoggingSink {
    /// New sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for LoggingSink {
    fn result(&mut self, result: &ProcessedResult) {
        match &result.aggregate {
            AggregateSnapshot::Record(record) => info!(
                pair = result.sequence_index,
                scalar_count = result.scalar_count,
                mean = record.scalar_mean,
                stderr = record.scalar_stderr,
                "Record frame"
            ),
            AggregateSnapshot::Scan(scan) => info!(
                pair = result.sequence_index,
                scalar_count = result.scalar_count,
                label = %scan.point.label,
                value = scan.point.value,
                "Scan frame"
            ),
        }

        if let Some(fit) = &result.fit {
            let frame = fit.params.in_frame_coordinates(&result.roi);
            info!(
                pair = result.sequence_index,
                converged = fit.converged,
                amp = frame.amplitude,
                x_mean = frame.x_mean,
                y_mean = frame.y_mean,
                x_width = frame.x_width,
                y_width = frame.y_width,
                offset = frame.offset,
                "Gaussian fit"
            );
        }
        self.last_aggregate = Some(result.aggregate.clone());
    }

    fn finished(&mut self, end: &SessionEnd) {
        if let Some(AggregateSnapshot::Scan(scan)) = &self.last_aggregate {
            for row in &scan.summary {
                info!(
                    label = %row.label,
                    value = row.value,
                    n = row.count,
                    mean = row.mean,
                    stderr = row.stderr,
                    "Scan summary"
                );
            }
        }
        info!(pairs = end.pairs(), completed = end.is_completed(), "Session finished");
    }
}

/// What the consumer saw during one session.
#[derive(Debug, Default)]
pub struct SessionReport {
    /// Processed results, in order. Only filled when retention is enabled.
    pub results: Vec<Arc<ProcessedResult>>,
    /// Most recent processed result.
    pub last: Option<Arc<ProcessedResult>>,
    /// Background frames seen.
    pub backgrounds: usize,
    /// Results written to the store.
    pub persisted: u32,
    /// Store operations that failed.
    pub persistence_failures: u32,
    /// How the session ended; `None` if the channel closed without a final event.
    pub end: Option<SessionEnd>,
}

/// Drains a session's event channel.
pub struct AcquisitionConsumer {
    sink: Box<dyn ResultSink>,
    store: Option<Box<dyn FrameStore>>,
    retain_results: bool,
}

impl AcquisitionConsumer {
    /// Consumer reporting to `sink`, without persistence.
    pub fn new(sink: impl ResultSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            store: None,
            retain_results: false,
        }
    }

    /// Append processed results to `store`.
    pub fn with_store(mut self, store: Box<dyn FrameStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Keep every processed result in the [`SessionReport`].
    pub fn with_retained_results(mut self) -> Self {
        self.retain_results = true;
        self
    }

    /// Consume events until the session ends.
    pub async fn run(
        mut self,
        run: RunDescriptor,
        mut events: mpsc::Receiver<AcquisitionEvent>,
    ) -> SessionReport {
        let mut report = SessionReport::default();

        if self.store.is_some() {
            let run_name = run.name.clone();
            match self.on_store(move |store| store.begin_run(&run)).await {
                Some(Ok(())) => info!(run = %run_name, "Persisting session"),
                Some(Err(e)) => {
                    warn!(
                        run = %run_name,
                        error = %e,
                        "Cannot begin run, persistence disabled for this session"
                    );
                    report.persistence_failures += 1;
                    self.store = None;
                }
                None => {}
            }
        }

        while let Some(event) = events.recv().await {
            match event {
                AcquisitionEvent::BackgroundCaptured(frame) => {
                    report.backgrounds += 1;
                    self.sink.background(&frame);
                }
                AcquisitionEvent::Processed(result) => {
                    self.sink.result(&result);
                    let stored = Arc::clone(&result);
                    match self.on_store(move |store| store.append(&stored)).await {
                        Some(Ok(())) => report.persisted += 1,
                        Some(Err(e)) => {
                            warn!(pair = result.sequence_index, error = %e, "Frame not persisted");
                            report.persistence_failures += 1;
                        }
                        None => {}
                    }
                    if self.retain_results {
                        report.results.push(Arc::clone(&result));
                    }
                    report.last = Some(result);
                }
                AcquisitionEvent::Finished(end) => {
                    self.sink.finished(&end);
                    report.end = Some(end);
                    break;
                }
            }
        }

        if report.end.is_none() {
            warn!("Event channel closed before the session finished");
        }
        report
    }

    /// Run `op` against the store on the blocking pool. `None` when there is no store.
    async fn on_store<F>(&mut self, op: F) -> Option<AppResult<()>>
    where
        F: FnOnce(&mut dyn FrameStore) -> AppResult<()> + Send + 'static,
    {
        let mut store = self.store.take()?;
        let outcome = tokio::task::spawn_blocking(move || {
            let result = op(&mut *store);
            (store, result)
        })
        .await;

        match outcome {
            Ok((store, result)) => {
                self.store = Some(store);
                Some(result)
            }
            Err(e) => {
                error!(error = %e, "Store task failed, persistence disabled");
                Some(Err(DaqError::Persistence(format!("store task failed: {}", e))))
            }
        }
    }
}
