//! Camera hardware surface.
//!
//! The acquisition core only talks to the device through the capability traits in
//! [`capabilities`]. A vendor driver implements them; [`mock::MockRingBufferCamera`]
//! simulates a ring-buffer camera for tests and for the CLI.

pub mod capabilities;
pub mod mock;

use crate::config::CameraSettings;
use crate::data::image::{orient_raw_pixels, ImageGrid};
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use capabilities::{
    CameraConfiguration, RingBufferAcquisition, RingBufferCamera, MIN_RING_CAPACITY,
};

/// Sensor readout area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SensorFormat {
    /// Nominal sensor area.
    #[default]
    Standard,
    /// Extended readout area.
    Extended,
}

/// Source of the exposure trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Free-running, the camera exposes continuously.
    #[default]
    Auto,
    /// Each exposure is started by [`RingBufferAcquisition::trigger_once`].
    Software,
    /// Exposures follow an external hardware trigger line.
    External,
}

/// A frame as read out of the ring buffer: row-major `u16` pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Pixels per row.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Row-major pixel data, `width * height` long.
    pub pixels: Vec<u16>,
}

impl RawFrame {
    /// Wrap a readout buffer, checking that its length matches the dimensions.
    pub fn new(width: usize, height: usize, pixels: Vec<u16>) -> AppResult<Self> {
        if pixels.len() != width * height {
            return Err(DaqError::Processing(format!(
                "frame buffer holds {} pixels, expected {}x{}",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Convert to the floating-point grid indexed `[x, y]` (transpose + vertical flip).
    pub fn to_image(&self) -> AppResult<ImageGrid> {
        orient_raw_pixels(self.width, self.height, &self.pixels)
    }
}

/// Push every configured camera setting to the device, in the order the hardware expects.
///
/// Exposure is rounded and clamped before it is sent; see
/// [`CameraSettings::effective_exposure`].
pub fn apply_camera_settings<C>(
    camera: &mut C,
    settings: &CameraSettings,
) -> AppResult<()>
where
    C: CameraConfiguration + ?Sized,
{
    let format = camera.set_sensor_format(settings.sensor_format)?;
    let clock = camera.set_clock_rate(settings.clock_rate_hz)?;
    let conversion = camera.set_conversion_factor(settings.conversion_factor)?;
    let trigger = camera.set_trigger_mode(settings.trigger_mode)?;
    let exposure = camera.set_exposure(settings.effective_exposure())?;
    let binning = camera.set_binning(settings.binning_horizontal, settings.binning_vertical)?;

    info!(
        ?format,
        clock_rate_hz = clock,
        conversion_factor = conversion,
        ?trigger,
        exposure_s = exposure,
        binning_h = binning.0,
        binning_v = binning.1,
        "Camera configured"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_rejects_short_buffer() {
        let err = RawFrame::new(4, 3, vec![0; 11]).unwrap_err();
        assert!(matches!(err, DaqError::Processing(_)));
    }

    #[test]
    fn raw_frame_orientation() {
        // 3 wide, 2 tall:
        // row 0: 1 2 3
        // row 1: 4 5 6
        let frame = RawFrame::new(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let image = frame.to_image().unwrap();

        assert_eq!(image.dim(), (3, 2));
        // y = 0 is the bottom row of the readout
        assert_eq!(image[[0, 0]], 4.0);
        assert_eq!(image[[2, 0]], 6.0);
        assert_eq!(image[[0, 1]], 1.0);
        assert_eq!(image[[2, 1]], 3.0);
    }

    #[test]
    fn camera_settings_are_applied_with_rounded_exposure() {
        use crate::config::AppConfig;
        use mock::{MockCameraConfig, MockRingBufferCamera};

        let mut camera = MockRingBufferCamera::new(MockCameraConfig::with_dims(8, 8));
        let probe = camera.probe();
        let mut settings = AppConfig::default().camera;
        settings.exposure_s = 0.0123456789;
        settings.binning_horizontal = 2;

        apply_camera_settings(&mut camera, &settings).unwrap();
        assert!((probe.exposure() - 0.01235).abs() < 1e-12);
        assert_eq!(probe.binning(), (2, 1));

        settings.clock_rate_hz = 5;
        let err = apply_camera_settings(&mut camera, &settings).unwrap_err();
        assert!(matches!(err, DaqError::InvalidConfiguration(_)));
    }

    #[test]
    fn enums_parse_lowercase() {
        #[derive(Deserialize)]
        struct Probe {
            format: SensorFormat,
            trigger: TriggerMode,
        }
        let probe: Probe = toml::from_str("format = \"extended\"\ntrigger = \"software\"").unwrap();
        assert_eq!(probe.format, SensorFormat::Extended);
        assert_eq!(probe.trigger, TriggerMode::Software);
    }
}
