//! Session lifecycle: start, stop, status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::AcquisitionEvent;
use super::poller::{Poller, SharedCamera};
use super::{AcquisitionMode, AcquisitionSettings, Session};
use crate::config::CameraSettings;
use crate::data::roi::Roi;
use crate::error::{AppResult, DaqError};
use crate::hardware::{apply_camera_settings, RingBufferCamera, MIN_RING_CAPACITY};

/// Owns the camera and at most one running session.
///
/// Control calls (`start`, `stop`, `is_active`) come from a single owner; results flow
/// out through the receiver returned by [`start`](Self::start).
pub struct SessionController {
    camera: SharedCamera,
    settings: AcquisitionSettings,
    active: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    last: Option<Session>,
}

impl SessionController {
    /// Controller for `camera`. The camera should already be configured.
    pub fn new(camera: Box<dyn RingBufferCamera>, settings: AcquisitionSettings) -> Self {
        Self {
            camera: Arc::new(Mutex::new(camera)),
            settings,
            active: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            last: None,
        }
    }

    /// Start capturing `frame_count` background/signal pairs.
    ///
    /// Must be called from within a Tokio runtime; the readout loop runs on the
    /// blocking pool. Returns the event stream, which always ends with
    /// [`AcquisitionEvent::Finished`].
    ///
    /// # Errors
    ///
    /// - [`DaqError::AlreadyActive`] while a session runs
    /// - [`DaqError::Configuration`] for a zero frame count or missing runtime
    /// - [`DaqError::InvalidRoi`] for a ROI that does not fit the current frame
    /// - any error the camera reports while arming
    pub fn start(
        &mut self,
        mode: AcquisitionMode,
        frame_count: u32,
        roi: Roi,
    ) -> AppResult<mpsc::Receiver<AcquisitionEvent>> {
        if self.is_active() {
            return Err(DaqError::AlreadyActive);
        }
        if frame_count == 0 {
            return Err(DaqError::Configuration(
                "frame_count must be at least 1".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DaqError::Configuration(format!("session requires a Tokio runtime: {}", e))
        })?;

        let shape = self.camera.lock().image_shape();
        roi.validate_for(shape)?;

        let fit = &self.settings.fit;
        let fit_enabled = fit.enabled && roi.area() <= fit.cpu_limit;
        if fit.enabled && !fit_enabled {
            warn!(
                roi_area = roi.area(),
                cpu_limit = fit.cpu_limit,
                "ROI too large for Gaussian fit, fitting disabled for this session"
            );
        }

        // One slot beyond the configured capacity is held back for `Finished`.
        let (tx, rx) = mpsc::channel(self.settings.event_capacity.max(1).saturating_add(1));
        let finish = tx
            .clone()
            .try_reserve_owned()
            .map_err(|e| DaqError::Processing(format!("cannot reserve session end slot: {}", e)))?;

        let capacity = self.settings.ring_buffer_capacity.max(MIN_RING_CAPACITY);
        self.camera.lock().arm_ring_buffer(capacity)?;

        if let Some(previous) = self.worker.take() {
            if !previous.is_finished() {
                debug!("Previous readout thread still exiting, detaching it");
            }
        }
        self.cancel.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);

        let session = Session {
            mode,
            target_frame_count: frame_count,
            roi,
            fit_enabled,
        };
        self.last = Some(session.clone());

        let poller = Poller {
            camera: Arc::clone(&self.camera),
            settings: self.settings.clone(),
            session,
            cancel: Arc::clone(&self.cancel),
            active: Arc::clone(&self.active),
            events: tx,
            finish,
        };
        self.worker = Some(runtime.spawn_blocking(move || poller.run()));

        info!(frame_count, ?shape, ring_capacity = capacity, "Session armed");
        Ok(rx)
    }

    /// Request the running session to stop. Idempotent; no effect when idle.
    ///
    /// The poller notices within one poll interval. A pair whose signal frame has not
    /// been read out yet is discarded.
    pub fn stop(&self) {
        if self.is_active() {
            info!("Stop requested");
        }
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Whether a session is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The most recently started session.
    pub fn session(&self) -> Option<&Session> {
        self.last.as_ref()
    }

    /// Wait for the readout thread of the last session to exit.
    pub async fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "Acquisition worker terminated abnormally");
                self.active.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Push `settings` to the camera. Rejected while a session runs.
    pub fn configure_camera(&self, settings: &CameraSettings) -> AppResult<()> {
        self.with_camera(|camera| apply_camera_settings(camera, settings))?
    }

    /// Run `f` against the camera while no session is active.
    pub fn with_camera<R>(&self, f: impl FnOnce(&mut dyn RingBufferCamera) -> R) -> AppResult<R> {
        if self.is_active() {
            return Err(DaqError::AlreadyActive);
        }
        let mut camera = self.camera.lock();
        Ok(f(&mut **camera))
    }

    /// Current frame shape `(nx, ny)`.
    pub fn image_shape(&self) -> (usize, usize) {
        self.camera.lock().image_shape()
    }

    /// Stop any session, wait for it, and release the camera.
    pub async fn close(mut self) -> AppResult<()> {
        self.stop();
        self.wait().await;
        self.camera.lock().close()?;
        info!("Camera closed");
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}
