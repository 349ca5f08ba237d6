//! Blocking readout loop.
//!
//! Runs on a `spawn_blocking` thread for the lifetime of one session. Frame ordinal `k`
//! (1-based) is ready once the camera's completed count reaches `k`; odd ordinals are
//! backgrounds and even ordinals signals. The camera lock is taken per device call so
//! `stop()` and probes never wait on a whole readout.
//!
//! Events are handed over with `try_send`. While the channel is full the loop keeps
//! checking the cancel flag, so a slow consumer cannot hold off `stop()`; a result that
//! could not be delivered before the stop is dropped. The final
//! [`AcquisitionEvent::Finished`] goes through capacity reserved when the session was
//! started and never waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use super::events::{AcquisitionEvent, SessionEnd};
use super::pipeline::PairProcessor;
use super::{AcquisitionSettings, Session};
use crate::data::gaussian_fit::GaussianFitter;
use crate::data::pairing::{FramePairer, FramePurpose, PairOutcome};
use crate::error::{AppResult, DaqError};
use crate::hardware::{RingBufferCamera, TriggerMode};

pub(super) type SharedCamera = Arc<Mutex<Box<dyn RingBufferCamera>>>;

/// Everything the readout thread owns.
pub(super) struct Poller {
    pub camera: SharedCamera,
    pub settings: AcquisitionSettings,
    pub session: Session,
    pub cancel: Arc<AtomicBool>,
    pub active: Arc<AtomicBool>,
    pub events: mpsc::Sender<AcquisitionEvent>,
    /// Slot reserved for the closing [`AcquisitionEvent::Finished`].
    pub finish: mpsc::OwnedPermit<AcquisitionEvent>,
}

enum Exit {
    Completed,
    Stopped,
    Failed(DaqError),
}

enum Delivery {
    Sent,
    Cancelled,
    Closed,
}

/// Clears the session's active flag when dropped, including on unwind.
struct ActiveFlag(Arc<AtomicBool>);

impl Drop for ActiveFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Poller {
    /// Run the session to completion, cancellation or failure.
    ///
    /// Always stops the camera, clears the active flag and sends exactly one
    /// [`AcquisitionEvent::Finished`].
    pub fn run(self) {
        let active = ActiveFlag(Arc::clone(&self.active));
        let started = Instant::now();
        info!(
            mode = self.session.mode.name(),
            frame_count = self.session.target_frame_count,
            fit = self.session.fit_enabled,
            "Acquisition session started"
        );

        let mut emitted = 0u32;
        let exit = self.acquire(&mut emitted);

        if let Err(e) = self.camera.lock().stop() {
            warn!(error = %e, "Failed to stop camera acquisition");
        }
        drop(active);

        let elapsed_ms = started.elapsed().as_millis();
        let end = match exit {
            Exit::Completed => {
                info!(pairs = emitted, elapsed_ms, "Acquisition session completed");
                SessionEnd::Completed { pairs: emitted }
            }
            Exit::Stopped => {
                info!(pairs = emitted, elapsed_ms, "Acquisition session stopped");
                SessionEnd::Stopped { pairs: emitted }
            }
            Exit::Failed(error) => {
                error!(
                    pairs = emitted,
                    elapsed_ms,
                    category = ?error.category(),
                    error = %error,
                    "Acquisition session aborted"
                );
                SessionEnd::Aborted {
                    pairs: emitted,
                    error,
                }
            }
        };

        self.finish.send(AcquisitionEvent::Finished(end));
    }

    fn acquire(&self, emitted: &mut u32) -> Exit {
        let fitter = self
            .session
            .fit_enabled
            .then(|| GaussianFitter::new(self.settings.fit.lm.clone()));
        let mut processor = PairProcessor::new(&self.session.mode, self.session.roi, fitter);
        let mut pairer = FramePairer::new(self.settings.background);
        let software = self.camera.lock().trigger_mode() == TriggerMode::Software;
        let last_ordinal = 2 * u64::from(self.session.target_frame_count);

        for ordinal in 1..=last_ordinal {
            if self.cancelled() {
                return self.stopped(&pairer);
            }
            let frame_start = Instant::now();

            match self.wait_for_frame(ordinal, software) {
                Ok(true) => {}
                Ok(false) => return self.stopped(&pairer),
                Err(e) => return Exit::Failed(e),
            }

            let fetched = self.camera.lock().fetch_latest_frame();
            let image = match fetched.and_then(|raw| raw.to_image()) {
                Ok(image) => image,
                Err(e) => return Exit::Failed(e),
            };
            let readout = frame_start.elapsed();

            let event = match pairer.accept(ordinal, image) {
                Ok(PairOutcome::BackgroundStored(background)) => {
                    debug!(ordinal, readout_us = readout.as_micros() as u64, "Background captured");
                    AcquisitionEvent::BackgroundCaptured(background)
                }
                Ok(PairOutcome::Pair(pair)) => {
                    let pair_index = pair.pair_index;
                    match processor.process(pair) {
                        Ok(result) => {
                            debug!(
                                pair = result.sequence_index,
                                scalar_count = result.scalar_count,
                                readout_us = readout.as_micros() as u64,
                                total_us = frame_start.elapsed().as_micros() as u64,
                                "Pair processed"
                            );
                            AcquisitionEvent::Processed(Arc::new(result))
                        }
                        Err(e) if !e.is_fatal() => {
                            warn!(pair = pair_index, error = %e, "Pair dropped");
                            continue;
                        }
                        Err(e) => return Exit::Failed(e),
                    }
                }
                Err(e) => return Exit::Failed(e),
            };

            let processed = matches!(event, AcquisitionEvent::Processed(_));
            match self.deliver(event) {
                Delivery::Sent => {
                    if processed {
                        *emitted += 1;
                    }
                }
                Delivery::Cancelled => {
                    debug!(ordinal, "Undelivered event dropped on stop");
                    return self.stopped(&pairer);
                }
                Delivery::Closed => {
                    warn!("Event consumer dropped, stopping session");
                    return Exit::Stopped;
                }
            }
        }
        Exit::Completed
    }

    fn stopped(&self, pairer: &FramePairer) -> Exit {
        if pairer.expected_purpose() == FramePurpose::Signal {
            debug!(
                pairs = pairer.pairs_completed(),
                "Discarding background without a signal frame"
            );
        }
        Exit::Stopped
    }

    /// Hand `event` to the consumer, waiting for space unless the session is cancelled.
    fn deliver(&self, mut event: AcquisitionEvent) -> Delivery {
        loop {
            match self.events.try_send(event) {
                Ok(()) => return Delivery::Sent,
                Err(TrySendError::Closed(_)) => return Delivery::Closed,
                Err(TrySendError::Full(returned)) => {
                    if self.cancelled() {
                        return Delivery::Cancelled;
                    }
                    event = returned;
                    std::thread::sleep(self.poll_step());
                }
            }
        }
    }

    /// Block until the completed count reaches `ordinal`. `Ok(false)` means cancelled.
    fn wait_for_frame(&self, ordinal: u64, software: bool) -> AppResult<bool> {
        if software {
            self.camera.lock().trigger_once()?;
            if !self.sleep_unless_cancelled(self.settings.settle_delay) {
                return Ok(false);
            }
        }

        loop {
            if self.cancelled() {
                return Ok(false);
            }
            let completed = self.camera.lock().poll_completed_count()?;
            if completed >= ordinal {
                return Ok(true);
            }
            std::thread::sleep(self.poll_step());
        }
    }

    fn sleep_unless_cancelled(&self, total: Duration) -> bool {
        let step = self.poll_step();
        let deadline = Instant::now() + total;
        loop {
            if self.cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(step.min(deadline - now));
        }
    }

    fn poll_step(&self) -> Duration {
        self.settings.poll_interval.max(Duration::from_millis(1))
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}
