//! Region of interest extraction.

use ndarray::s;
use serde::{Deserialize, Serialize};

use super::image::ImageGrid;
use crate::error::{AppResult, DaqError};

/// Half-open rectangle `[xmin, xmax) x [ymin, ymax)` in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// First column included.
    pub xmin: usize,
    /// First column excluded.
    pub xmax: usize,
    /// First row included.
    pub ymin: usize,
    /// First row excluded.
    pub ymax: usize,
}

impl Roi {
    /// Build a non-empty ROI.
    pub fn new(xmin: usize, xmax: usize, ymin: usize, ymax: usize) -> AppResult<Self> {
        let roi = Self {
            xmin,
            xmax,
            ymin,
            ymax,
        };
        roi.check_ordered()?;
        Ok(roi)
    }

    /// ROI covering a whole `(nx, ny)` image.
    pub fn full(shape: (usize, usize)) -> Self {
        Self {
            xmin: 0,
            xmax: shape.0,
            ymin: 0,
            ymax: shape.1,
        }
    }

    fn check_ordered(&self) -> AppResult<()> {
        if self.xmin >= self.xmax {
            return Err(DaqError::InvalidRoi(format!(
                "xmin {} must be below xmax {}",
                self.xmin, self.xmax
            )));
        }
        if self.ymin >= self.ymax {
            return Err(DaqError::InvalidRoi(format!(
                "ymin {} must be below ymax {}",
                self.ymin, self.ymax
            )));
        }
        Ok(())
    }

    /// Check the ROI is non-empty and lies inside an image of `shape = (nx, ny)`.
    pub fn validate_for(&self, shape: (usize, usize)) -> AppResult<()> {
        self.check_ordered()?;
        if self.xmax > shape.0 || self.ymax > shape.1 {
            return Err(DaqError::InvalidRoi(format!(
                "[{}, {}) x [{}, {}) exceeds frame of {}x{}",
                self.xmin, self.xmax, self.ymin, self.ymax, shape.0, shape.1
            )));
        }
        Ok(())
    }

    /// Shape of the cropped grid.
    pub fn shape(&self) -> (usize, usize) {
        (
            self.xmax.saturating_sub(self.xmin),
            self.ymax.saturating_sub(self.ymin),
        )
    }

    /// Pixel count, the quantity compared against the fit budget.
    pub fn area(&self) -> usize {
        let (w, h) = self.shape();
        w * h
    }

    /// Copy the ROI out of `image`.
    pub fn crop(&self, image: &ImageGrid) -> AppResult<ImageGrid> {
        self.validate_for(image.dim())?;
        Ok(image
            .slice(s![self.xmin..self.xmax, self.ymin..self.ymax])
            .to_owned())
    }

    /// Crop `image` and sum the crop. Returns `(crop, scalar_count)`.
    pub fn extract(&self, image: &ImageGrid) -> AppResult<(ImageGrid, f64)> {
        let crop = self.crop(image)?;
        let count = crop.sum();
        Ok((crop, count))
    }
}
