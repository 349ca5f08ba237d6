//! Image grid type.
//!
//! Frames are held as `Array2<f64>` indexed `[x, y]`, shape `(nx, ny)`. The readout
//! buffer is row-major with row 0 at the top of the sensor, so conversion transposes
//! and flips vertically: `grid[[x, y]] = raw[ny - 1 - y][x]`.

use ndarray::Array2;

use crate::error::{AppResult, DaqError};

/// Floating-point image indexed `[x, y]`.
pub type ImageGrid = Array2<f64>;

/// Convert a row-major `width` x `height` readout buffer into an oriented grid.
pub fn orient_raw_pixels(width: usize, height: usize, pixels: &[u16]) -> AppResult<ImageGrid> {
    if pixels.len() != width * height {
        return Err(DaqError::Processing(format!(
            "readout of {} pixels does not match {}x{}",
            pixels.len(),
            width,
            height
        )));
    }
    Ok(Array2::from_shape_fn((width, height), |(x, y)| {
        f64::from(pixels[(height - 1 - y) * width + x])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_is_transpose_then_flip() {
        // 2 wide, 3 tall, rows top to bottom
        let raw = [1, 2, 3, 4, 5, 6];
        let grid = orient_raw_pixels(2, 3, &raw).unwrap();

        assert_eq!(grid.dim(), (2, 3));
        assert_eq!(grid[[0, 0]], 5.0);
        assert_eq!(grid[[1, 0]], 6.0);
        assert_eq!(grid[[0, 2]], 1.0);
        assert_eq!(grid[[1, 2]], 2.0);
    }

    #[test]
    fn empty_frame_is_allowed() {
        let grid = orient_raw_pixels(0, 0, &[]).unwrap();
        assert_eq!(grid.len(), 0);
    }
}
