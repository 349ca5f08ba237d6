//! Mock ring-buffer camera.
//!
//! Simulates the readout behaviour the session controller depends on, without hardware:
//!
//! - a completed-frame counter that advances on every poll (free-running and external
//!   trigger modes, optionally rate-limited) or on every software trigger
//! - "latest frame" readout generated from a [`FramePattern`]
//! - fault and stall injection for testing session abort and cancellation
//!
//! State lives behind an `Arc<parking_lot::Mutex<_>>` so a [`MockProbe`] can observe
//! the device while a session owns it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use super::{
    CameraConfiguration, RawFrame, RingBufferAcquisition, SensorFormat, TriggerMode,
};
use crate::error::{AppResult, DaqError};

pub use super::capabilities::MIN_RING_CAPACITY;

const CLOCK_RATES_HZ: [u32; 2] = [12_000_000, 24_000_000];
const CONVERSION_FACTORS: [u32; 2] = [100, 150];
const BINNING_FACTORS: [u16; 3] = [1, 2, 4];

// =============================================================================
// Frame content
// =============================================================================

/// Content produced for each completed frame.
#[derive(Debug, Clone)]
pub enum FramePattern {
    /// Row-major readout buffers, frame `k` (1-based) returns `frames[(k - 1) % len]`.
    Scripted(Vec<Vec<u16>>),
    /// `(x + y + k) % 4096` test pattern.
    Gradient,
    /// 2-D Gaussian spot in image coordinates plus uniform noise in `[0, noise)`.
    GaussianSpot {
        /// Peak height above offset.
        amplitude: f64,
        /// Spot centre along x.
        x_center: f64,
        /// Spot centre along y.
        y_center: f64,
        /// Width along x.
        x_width: f64,
        /// Width along y.
        y_width: f64,
        /// Constant floor.
        offset: f64,
        /// Uniform noise amplitude.
        noise: f64,
    },
}

impl FramePattern {
    /// A spot centred in an `nx` x `ny` image, similar to a focused beam on the sensor.
    pub fn centered_spot(nx: usize, ny: usize) -> Self {
        FramePattern::GaussianSpot {
            amplitude: 100.0,
            x_center: nx as f64 / 2.0,
            y_center: ny as f64 / 2.0,
            x_width: (nx as f64 / 10.0).max(1.0),
            y_width: (ny as f64 / 10.0).max(1.0),
            offset: 10.0,
            noise: 10.0,
        }
    }

    fn render(&self, frame_number: u64, width: usize, height: usize) -> AppResult<Vec<u16>> {
        match self {
            FramePattern::Scripted(frames) => {
                if frames.is_empty() {
                    return Err(DaqError::DeviceFault("no scripted frames".into()));
                }
                let slot = ((frame_number.max(1) - 1) % frames.len() as u64) as usize;
                Ok(frames[slot].clone())
            }
            FramePattern::Gradient => {
                let mut pixels = Vec::with_capacity(width * height);
                for row in 0..height {
                    for col in 0..width {
                        pixels.push(((col as u64 + row as u64 + frame_number) % 4096) as u16);
                    }
                }
                Ok(pixels)
            }
            FramePattern::GaussianSpot {
                amplitude,
                x_center,
                y_center,
                x_width,
                y_width,
                offset,
                noise,
            } => {
                let mut rng = rand::thread_rng();
                let mut pixels = Vec::with_capacity(width * height);
                for row in 0..height {
                    // Readout row 0 is the top of the oriented image.
                    let y = (height - 1 - row) as f64;
                    for col in 0..width {
                        let x = col as f64;
                        let dx = (x - x_center) / x_width;
                        let dy = (y - y_center) / y_width;
                        let mut value = amplitude * (-0.5 * (dx * dx + dy * dy)).exp() + offset;
                        if *noise > 0.0 {
                            value += rng.gen::<f64>() * noise;
                        }
                        pixels.push(value.round().clamp(0.0, f64::from(u16::MAX)) as u16);
                    }
                }
                Ok(pixels)
            }
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Static properties of the simulated sensor.
#[derive(Debug, Clone)]
pub struct MockCameraConfig {
    /// Unbinned `(width, height)` in standard sensor format.
    pub standard_dims: (usize, usize),
    /// Unbinned `(width, height)` in extended sensor format.
    pub extended_dims: (usize, usize),
    /// Minimum time between completed frames when free-running. Zero completes one
    /// frame per poll.
    pub frame_interval: Duration,
    /// Accepted exposure range in seconds.
    pub exposure_limits: (f64, f64),
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            standard_dims: (1392, 1040),
            extended_dims: (800, 600),
            frame_interval: Duration::ZERO,
            exposure_limits: (1e-5, 60.0),
        }
    }
}

impl MockCameraConfig {
    /// A sensor of `width` x `height` in both formats, completing one frame per poll.
    pub fn with_dims(width: usize, height: usize) -> Self {
        Self {
            standard_dims: (width, height),
            extended_dims: (width, height),
            ..Self::default()
        }
    }
}

// =============================================================================
// Device state
// =============================================================================

#[derive(Debug)]
struct MockState {
    config: MockCameraConfig,
    pattern: FramePattern,
    sensor_format: SensorFormat,
    clock_rate_hz: u32,
    conversion_factor: u32,
    trigger_mode: TriggerMode,
    exposure_s: f64,
    binning: (u16, u16),
    armed: bool,
    ring_capacity: usize,
    completed: u64,
    fetched: u64,
    last_completion: Option<Instant>,
    trigger_count: u64,
    stop_count: u64,
    closed: bool,
    stalled: bool,
    stall_after: Option<u64>,
    fault_after: Option<u64>,
}

impl MockState {
    fn shape(&self) -> (usize, usize) {
        let (width, height) = match self.sensor_format {
            SensorFormat::Standard => self.config.standard_dims,
            SensorFormat::Extended => self.config.extended_dims,
        };
        (
            width / usize::from(self.binning.0.max(1)),
            height / usize::from(self.binning.1.max(1)),
        )
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed {
            return Err(DaqError::DeviceFault("camera is closed".into()));
        }
        Ok(())
    }

    fn can_complete(&self) -> bool {
        self.armed
            && !self.stalled
            && self.stall_after.map_or(true, |limit| self.completed < limit)
    }

    fn complete_frame(&mut self) {
        self.completed += 1;
        self.last_completion = Some(Instant::now());
    }
}

/// Simulated ring-buffer camera.
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockRingBufferCamera::new(MockCameraConfig::with_dims(4, 4))
///     .with_pattern(FramePattern::Scripted(vec![vec![0; 16], vec![5; 16]]));
/// let probe = camera.probe();
/// ```
pub struct MockRingBufferCamera {
    state: Arc<Mutex<MockState>>,
}

impl MockRingBufferCamera {
    /// Create a mock with a gradient test pattern and free-running trigger.
    pub fn new(config: MockCameraConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                config,
                pattern: FramePattern::Gradient,
                sensor_format: SensorFormat::Standard,
                clock_rate_hz: CLOCK_RATES_HZ[0],
                conversion_factor: CONVERSION_FACTORS[0],
                trigger_mode: TriggerMode::Auto,
                exposure_s: 0.001,
                binning: (1, 1),
                armed: false,
                ring_capacity: 0,
                completed: 0,
                fetched: 0,
                last_completion: None,
                trigger_count: 0,
                stop_count: 0,
                closed: false,
                stalled: false,
                stall_after: None,
                fault_after: None,
            })),
        }
    }

    /// Use `pattern` for frame content.
    pub fn with_pattern(self, pattern: FramePattern) -> Self {
        self.state.lock().pattern = pattern;
        self
    }

    /// Start in `mode` instead of free-running.
    pub fn with_trigger_mode(self, mode: TriggerMode) -> Self {
        self.state.lock().trigger_mode = mode;
        self
    }

    /// Stop completing frames once `frames` have completed.
    pub fn stall_after(self, frames: u64) -> Self {
        self.state.lock().stall_after = Some(frames);
        self
    }

    /// Report a device fault on every poll once `frames` have been read out.
    pub fn fault_after(self, frames: u64) -> Self {
        self.state.lock().fault_after = Some(frames);
        self
    }

    /// Observer handle sharing this device's state.
    pub fn probe(&self) -> MockProbe {
        MockProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl RingBufferAcquisition for MockRingBufferCamera {
    fn arm_ring_buffer(&mut self, capacity: usize) -> AppResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if capacity < MIN_RING_CAPACITY {
            return Err(DaqError::InvalidConfiguration(format!(
                "ring buffer needs at least {} slots, got {}",
                MIN_RING_CAPACITY, capacity
            )));
        }
        state.armed = true;
        state.ring_capacity = capacity;
        state.completed = 0;
        state.fetched = 0;
        state.last_completion = None;
        Ok(())
    }

    fn trigger_once(&mut self) -> AppResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.trigger_count += 1;
        if state.trigger_mode == TriggerMode::Software && state.can_complete() {
            state.complete_frame();
        }
        Ok(())
    }

    fn poll_completed_count(&mut self) -> AppResult<u64> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if let Some(limit) = state.fault_after {
            if state.fetched >= limit {
                return Err(DaqError::DeviceFault(format!(
                    "readout failed after {} frames",
                    state.fetched
                )));
            }
        }
        if state.trigger_mode != TriggerMode::Software && state.can_complete() {
            let due = state
                .last_completion
                .map_or(true, |at| at.elapsed() >= state.config.frame_interval);
            if due {
                state.complete_frame();
            }
        }
        Ok(state.completed)
    }

    fn fetch_latest_frame(&mut self) -> AppResult<RawFrame> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if state.completed == 0 {
            return Err(DaqError::DeviceFault("no completed frame in ring buffer".into()));
        }
        let (width, height) = state.shape();
        let pixels = state.pattern.render(state.completed, width, height)?;
        state.fetched += 1;
        RawFrame::new(width, height, pixels)
    }

    fn stop(&mut self) -> AppResult<()> {
        let mut state = self.state.lock();
        state.armed = false;
        state.stop_count += 1;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        let mut state = self.state.lock();
        state.armed = false;
        state.closed = true;
        Ok(())
    }

    fn image_shape(&self) -> (usize, usize) {
        self.state.lock().shape()
    }

    fn trigger_mode(&self) -> TriggerMode {
        self.state.lock().trigger_mode
    }
}

impl CameraConfiguration for MockRingBufferCamera {
    fn set_sensor_format(&mut self, format: SensorFormat) -> AppResult<SensorFormat> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.sensor_format = format;
        Ok(format)
    }

    fn set_clock_rate(&mut self, hz: u32) -> AppResult<u32> {
        if !CLOCK_RATES_HZ.contains(&hz) {
            return Err(DaqError::InvalidConfiguration(format!(
                "clock rate {} Hz not supported (options: {:?})",
                hz, CLOCK_RATES_HZ
            )));
        }
        self.state.lock().clock_rate_hz = hz;
        Ok(hz)
    }

    fn set_conversion_factor(&mut self, factor: u32) -> AppResult<u32> {
        if !CONVERSION_FACTORS.contains(&factor) {
            return Err(DaqError::InvalidConfiguration(format!(
                "conversion factor {} not supported (options: {:?})",
                factor, CONVERSION_FACTORS
            )));
        }
        self.state.lock().conversion_factor = factor;
        Ok(factor)
    }

    fn set_trigger_mode(&mut self, mode: TriggerMode) -> AppResult<TriggerMode> {
        self.state.lock().trigger_mode = mode;
        Ok(mode)
    }

    fn set_exposure(&mut self, seconds: f64) -> AppResult<f64> {
        let mut state = self.state.lock();
        let (min, max) = state.config.exposure_limits;
        if !seconds.is_finite() || seconds < min || seconds > max {
            return Err(DaqError::InvalidConfiguration(format!(
                "exposure {} s outside [{}, {}] s",
                seconds, min, max
            )));
        }
        state.exposure_s = seconds;
        Ok(seconds)
    }

    fn set_binning(&mut self, horizontal: u16, vertical: u16) -> AppResult<(u16, u16)> {
        if !BINNING_FACTORS.contains(&horizontal) || !BINNING_FACTORS.contains(&vertical) {
            return Err(DaqError::InvalidConfiguration(format!(
                "binning {}x{} not supported (options: {:?})",
                horizontal, vertical, BINNING_FACTORS
            )));
        }
        self.state.lock().binning = (horizontal, vertical);
        Ok((horizontal, vertical))
    }
}

// =============================================================================
// Probe
// =============================================================================

/// Read-mostly view of a [`MockRingBufferCamera`] for assertions in tests.
#[derive(Clone)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

impl MockProbe {
    /// Frames completed since the last arm.
    pub fn frames_completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// Frames read out since the last arm.
    pub fn frames_fetched(&self) -> u64 {
        self.state.lock().fetched
    }

    /// Slots requested by the last arm.
    pub fn ring_capacity(&self) -> usize {
        self.state.lock().ring_capacity
    }

    /// Whether the ring buffer is armed.
    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    /// Software triggers received.
    pub fn trigger_count(&self) -> u64 {
        self.state.lock().trigger_count
    }

    /// Times acquisition was stopped.
    pub fn stop_count(&self) -> u64 {
        self.state.lock().stop_count
    }

    /// Whether the device was closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current exposure in seconds.
    pub fn exposure(&self) -> f64 {
        self.state.lock().exposure_s
    }

    /// Current `(horizontal, vertical)` binning.
    pub fn binning(&self) -> (u16, u16) {
        self.state.lock().binning
    }

    /// Freeze or resume frame completion.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }
}
