//! Camera capability traits.
//!
//! A ring-buffer camera is split into two small capabilities:
//!
//! - [`RingBufferAcquisition`]: arm the device ring buffer, trigger, poll the
//!   completed-frame counter and fetch the newest frame.
//! - [`CameraConfiguration`]: the setters that shape the readout (sensor format,
//!   clock rate, conversion factor, trigger mode, exposure, binning).
//!
//! [`RingBufferCamera`] is implemented for every type providing both, so the session
//! controller can hold a single `Box<dyn RingBufferCamera>`.
//!
//! # Contract
//!
//! - Methods are synchronous. The poller runs on a blocking thread and owns the device
//!   exclusively while a session is active.
//! - Every hardware error status is reported as [`DaqError::DeviceFault`].
//! - Setters return the value actually applied, or [`DaqError::InvalidConfiguration`].
//!
//! [`DaqError::DeviceFault`]: crate::error::DaqError::DeviceFault
//! [`DaqError::InvalidConfiguration`]: crate::error::DaqError::InvalidConfiguration

use super::{RawFrame, SensorFormat, TriggerMode};
use crate::error::AppResult;

/// Smallest ring buffer a device accepts.
pub const MIN_RING_CAPACITY: usize = 4;

/// Capability: ring-buffer frame acquisition.
pub trait RingBufferAcquisition: Send {
    /// Allocate and arm the device ring buffer. Resets the completed-frame counter.
    ///
    /// `capacity` is the number of frame slots; devices require at least 4.
    fn arm_ring_buffer(&mut self, capacity: usize) -> AppResult<()>;

    /// Fire one software trigger.
    fn trigger_once(&mut self) -> AppResult<()>;

    /// Number of frames the device has finished processing since arming.
    fn poll_completed_count(&mut self) -> AppResult<u64>;

    /// Read out the most recently completed frame (not the oldest).
    fn fetch_latest_frame(&mut self) -> AppResult<RawFrame>;

    /// Stop the running acquisition. The device stays open.
    fn stop(&mut self) -> AppResult<()>;

    /// Release the device.
    fn close(&mut self) -> AppResult<()>;

    /// Oriented image shape `(nx, ny)`: sensor format dimensions divided by binning.
    fn image_shape(&self) -> (usize, usize);

    /// Currently configured trigger source.
    fn trigger_mode(&self) -> TriggerMode;
}

/// Capability: camera readout configuration.
pub trait CameraConfiguration: Send {
    /// Select the sensor readout area.
    fn set_sensor_format(&mut self, format: SensorFormat) -> AppResult<SensorFormat>;

    /// Set the pixel clock in Hz.
    fn set_clock_rate(&mut self, hz: u32) -> AppResult<u32>;

    /// Set the conversion factor (electrons per count, x100).
    fn set_conversion_factor(&mut self, factor: u32) -> AppResult<u32>;

    /// Select the trigger source.
    fn set_trigger_mode(&mut self, mode: TriggerMode) -> AppResult<TriggerMode>;

    /// Set the exposure time in seconds.
    fn set_exposure(&mut self, seconds: f64) -> AppResult<f64>;

    /// Set horizontal and vertical binning.
    fn set_binning(&mut self, horizontal: u16, vertical: u16) -> AppResult<(u16, u16)>;
}

/// A camera usable by the acquisition session.
pub trait RingBufferCamera: RingBufferAcquisition + CameraConfiguration {}

impl<T> RingBufferCamera for T where T: RingBufferAcquisition + CameraConfiguration + ?Sized {}
