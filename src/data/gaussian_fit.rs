//! 2-D Gaussian fit of the ROI crop.
//!
//! Model, in crop coordinates:
//!
//! ```text
//! f(x, y) = amplitude * exp(-0.5 * ((x - x_mean) / x_width)^2 - 0.5 * ((y - y_mean) / y_width)^2) + offset
//! ```
//!
//! The initial guess comes from image moments; it is refined by Levenberg-Marquardt
//! minimisation of the raw pixel residuals with an analytic Jacobian. The fitter never
//! fails a frame: when the optimiser does not converge, [`FitNonConvergence`] carries
//! the best parameters reached.

use thiserror::Error;

use super::image::ImageGrid;
use super::roi::Roi;

const N_PARAMS: usize = 6;
const LAMBDA_CEILING: f64 = 1e10;
const SINGULAR_PIVOT: f64 = 1e-10;

/// Gaussian parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitParams {
    /// Peak height above offset.
    pub amplitude: f64,
    /// Centre along x.
    pub x_mean: f64,
    /// Centre along y.
    pub y_mean: f64,
    /// Standard deviation along x.
    pub x_width: f64,
    /// Standard deviation along y.
    pub y_width: f64,
    /// Constant background.
    pub offset: f64,
}

impl FitParams {
    fn to_array(self) -> [f64; N_PARAMS] {
        [
            self.amplitude,
            self.x_mean,
            self.y_mean,
            self.x_width,
            self.y_width,
            self.offset,
        ]
    }

    fn from_array(p: [f64; N_PARAMS]) -> Self {
        Self {
            amplitude: p[0],
            x_mean: p[1],
            y_mean: p[2],
            x_width: p[3].abs(),
            y_width: p[4].abs(),
            offset: p[5],
        }
    }

    /// Model value at `(x, y)`.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let u = (x - self.x_mean) / self.x_width;
        let v = (y - self.y_mean) / self.y_width;
        self.amplitude * (-0.5 * (u * u + v * v)).exp() + self.offset
    }

    /// Same parameters with the centre moved from crop to full-frame coordinates.
    pub fn in_frame_coordinates(&self, roi: &Roi) -> Self {
        Self {
            x_mean: self.x_mean + roi.xmin as f64,
            y_mean: self.y_mean + roi.ymin as f64,
            ..*self
        }
    }

    /// `(name, value)` pairs, in the order they are stored as attributes.
    pub fn named_values(&self) -> [(&'static str, f64); N_PARAMS] {
        [
            ("amp", self.amplitude),
            ("x_mean", self.x_mean),
            ("y_mean", self.y_mean),
            ("x_width", self.x_width),
            ("y_width", self.y_width),
            ("offset", self.offset),
        ]
    }
}

/// Outcome of a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    /// Fitted parameters (crop coordinates).
    pub params: FitParams,
    /// Whether the optimiser met its convergence criterion.
    pub converged: bool,
    /// Optimiser iterations used.
    pub iterations: usize,
    /// Sum of squared residuals.
    pub chi2: f64,
}

/// The optimiser stopped without converging.
#[derive(Debug, Clone, Copy, Error)]
#[error("Gaussian fit did not converge after {iterations} iterations (chi2 = {chi2:.4e})")]
pub struct FitNonConvergence {
    /// Lowest-residual parameters reached.
    pub params: FitParams,
    /// Iterations spent.
    pub iterations: usize,
    /// Residual of `params`.
    pub chi2: f64,
}

impl FitNonConvergence {
    fn from_fit(fit: GaussianFit) -> Self {
        Self {
            params: fit.params,
            iterations: fit.iterations,
            chi2: fit.chi2,
        }
    }

    /// The best-effort result to report in place of a converged fit.
    pub fn best_effort(&self) -> GaussianFit {
        GaussianFit {
            params: self.params,
            converged: false,
            iterations: self.iterations,
            chi2: self.chi2,
        }
    }
}

/// Levenberg-Marquardt settings.
#[derive(Debug, Clone)]
pub struct LmConfig {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Relative step and residual-decrease tolerance.
    pub tolerance: f64,
    /// Initial damping.
    pub initial_lambda: f64,
    /// Damping multiplier after a rejected step.
    pub lambda_up: f64,
    /// Damping multiplier after an accepted step.
    pub lambda_down: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// Gaussian fitter for ROI crops.
#[derive(Debug, Clone, Default)]
pub struct GaussianFitter {
    config: LmConfig,
}

impl GaussianFitter {
    /// Fitter using `config`.
    pub fn new(config: LmConfig) -> Self {
        Self { config }
    }

    /// Fit `data`, indexed `[x, y]`.
    pub fn fit(&self, data: &ImageGrid) -> Result<GaussianFit, FitNonConvergence> {
        let guess = initial_guess(data);
        let samples = Samples::from_grid(data);

        if samples.z.len() < N_PARAMS {
            return Err(FitNonConvergence {
                params: guess,
                iterations: 0,
                chi2: samples.chi2(&guess.to_array()),
            });
        }

        let fit = levenberg_marquardt(&samples, guess.to_array(), &self.config);
        if fit.converged {
            Ok(fit)
        } else {
            Err(FitNonConvergence::from_fit(fit))
        }
    }
}

/// Moment-based starting point.
///
/// Centroid from intensity-weighted coordinates, widths from second moments along the
/// column and row through the centroid, offset from the mean edge pixel and amplitude
/// as peak minus offset. Degenerate moments fall back to the crop centre and a quarter
/// of the crop size.
pub fn initial_guess(data: &ImageGrid) -> FitParams {
    let (nx, ny) = data.dim();
    if nx == 0 || ny == 0 {
        return FitParams {
            amplitude: 0.0,
            x_mean: 0.0,
            y_mean: 0.0,
            x_width: 1.0,
            y_width: 1.0,
            offset: 0.0,
        };
    }

    let total = data.sum();
    let (mut sum_x, mut sum_y) = (0.0, 0.0);
    for ((x, y), &v) in data.indexed_iter() {
        sum_x += x as f64 * v;
        sum_y += y as f64 * v;
    }
    let x_mean = finite_or(sum_x / total, (nx as f64 - 1.0) / 2.0);
    let y_mean = finite_or(sum_y / total, (ny as f64 - 1.0) / 2.0);

    let xi = clamp_index(x_mean, nx);
    let yi = clamp_index(y_mean, ny);

    let col = data.column(yi);
    let x_width = second_moment_width(col.iter().copied(), x_mean, nx);
    let row = data.row(xi);
    let y_width = second_moment_width(row.iter().copied(), y_mean, ny);

    let edges = data.row(0).sum()
        + data.row(nx - 1).sum()
        + data.column(0).sum()
        + data.column(ny - 1).sum();
    let offset = finite_or(edges / (nx + ny) as f64 / 2.0, 0.0);
    let peak = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let amplitude = finite_or(peak - offset, 0.0);

    FitParams {
        amplitude,
        x_mean,
        y_mean,
        x_width,
        y_width,
        offset,
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn clamp_index(coord: f64, len: usize) -> usize {
    if coord <= 0.0 {
        0
    } else {
        (coord as usize).min(len - 1)
    }
}

fn second_moment_width(values: impl Iterator<Item = f64>, mean: f64, len: usize) -> f64 {
    let (mut weighted, mut total) = (0.0, 0.0);
    for (i, v) in values.enumerate() {
        weighted += ((i as f64 - mean).powi(2) * v).abs();
        total += v;
    }
    let width = (weighted / total).sqrt();
    if width.is_finite() && width > 0.0 {
        width
    } else {
        (len as f64 / 4.0).max(1.0)
    }
}

// =============================================================================
// Levenberg-Marquardt
// =============================================================================

struct Samples {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
}

impl Samples {
    fn from_grid(data: &ImageGrid) -> Self {
        let mut samples = Samples {
            x: Vec::with_capacity(data.len()),
            y: Vec::with_capacity(data.len()),
            z: Vec::with_capacity(data.len()),
        };
        for ((x, y), &v) in data.indexed_iter() {
            if v.is_finite() {
                samples.x.push(x as f64);
                samples.y.push(y as f64);
                samples.z.push(v);
            }
        }
        samples
    }

    fn chi2(&self, p: &[f64; N_PARAMS]) -> f64 {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((&x, &y), &z)| {
                let r = z - model(x, y, p);
                r * r
            })
            .sum()
    }
}

fn model(x: f64, y: f64, p: &[f64; N_PARAMS]) -> f64 {
    let u = (x - p[1]) / p[3];
    let v = (y - p[2]) / p[4];
    p[0] * (-0.5 * (u * u + v * v)).exp() + p[5]
}

fn jacobian_row(x: f64, y: f64, p: &[f64; N_PARAMS]) -> [f64; N_PARAMS] {
    let u = (x - p[1]) / p[3];
    let v = (y - p[2]) / p[4];
    let e = (-0.5 * (u * u + v * v)).exp();
    let ae = p[0] * e;
    [
        e,
        ae * u / p[3],
        ae * v / p[4],
        ae * u * u / p[3],
        ae * v * v / p[4],
        1.0,
    ]
}

#[allow(clippy::needless_range_loop)]
fn normal_equations(samples: &Samples, p: &[f64; N_PARAMS]) -> ([[f64; N_PARAMS]; N_PARAMS], [f64; N_PARAMS]) {
    let mut hessian = [[0.0; N_PARAMS]; N_PARAMS];
    let mut gradient = [0.0; N_PARAMS];

    for ((&x, &y), &z) in samples.x.iter().zip(&samples.y).zip(&samples.z) {
        let row = jacobian_row(x, y, p);
        let r = z - model(x, y, p);
        for i in 0..N_PARAMS {
            gradient[i] += row[i] * r;
            for j in i..N_PARAMS {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 1..N_PARAMS {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }
    (hessian, gradient)
}

/// Gaussian elimination with partial pivoting. `None` when the system is singular.
#[allow(clippy::needless_range_loop)]
fn solve(a: &[[f64; N_PARAMS]; N_PARAMS], b: &[f64; N_PARAMS]) -> Option<[f64; N_PARAMS]> {
    let mut m = *a;
    let mut rhs = *b;

    for col in 0..N_PARAMS {
        let mut pivot = col;
        for row in (col + 1)..N_PARAMS {
            if m[row][col].abs() > m[pivot][col].abs() {
                pivot = row;
            }
        }
        let magnitude = m[pivot][col].abs();
        if magnitude.is_nan() || magnitude < SINGULAR_PIVOT {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in (col + 1)..N_PARAMS {
            let factor = m[row][col] / m[col][col];
            let pivot_row = m[col];
            for (j, value) in m[row].iter_mut().enumerate().skip(col) {
                *value -= factor * pivot_row[j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0; N_PARAMS];
    for i in (0..N_PARAMS).rev() {
        let mut sum = rhs[i];
        for j in (i + 1)..N_PARAMS {
            sum -= m[i][j] * x[j];
        }
        x[i] = sum / m[i][i];
    }
    Some(x)
}

fn small_step(delta: &[f64; N_PARAMS], params: &[f64; N_PARAMS], tol: f64) -> bool {
    delta
        .iter()
        .zip(params)
        .all(|(d, p)| d.abs() <= tol * (p.abs() + tol))
}

fn levenberg_marquardt(samples: &Samples, initial: [f64; N_PARAMS], config: &LmConfig) -> GaussianFit {
    let mut params = initial;
    let mut chi2 = samples.chi2(&params);
    let mut lambda = config.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    if !chi2.is_finite() {
        return GaussianFit {
            params: FitParams::from_array(params),
            converged: false,
            iterations,
            chi2,
        };
    }

    while iterations < config.max_iterations {
        if chi2 == 0.0 {
            converged = true;
            break;
        }
        iterations += 1;

        let (hessian, gradient) = normal_equations(samples, &params);
        let mut damped = hessian;
        for (i, row) in damped.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }
        let Some(delta) = solve(&damped, &gradient) else {
            break;
        };

        let mut candidate = params;
        for (p, d) in candidate.iter_mut().zip(&delta) {
            *p += d;
        }
        let candidate_chi2 = samples.chi2(&candidate);

        if candidate_chi2.is_finite() && candidate_chi2 < chi2 {
            let decrease = chi2 - candidate_chi2;
            params = candidate;
            chi2 = candidate_chi2;
            lambda *= config.lambda_down;
            if small_step(&delta, &params, config.tolerance) || decrease <= config.tolerance * chi2 {
                converged = true;
                break;
            }
        } else {
            // At the optimum the residual sits on the float floor; a vanishing step still counts.
            if small_step(&delta, &params, config.tolerance) {
                converged = true;
                break;
            }
            lambda *= config.lambda_up;
            if lambda > LAMBDA_CEILING {
                break;
            }
        }
    }

    GaussianFit {
        params: FitParams::from_array(params),
        converged,
        iterations,
        chi2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn synthetic(truth: &FitParams, nx: usize, ny: usize) -> ImageGrid {
        Array2::from_shape_fn((nx, ny), |(x, y)| truth.evaluate(x as f64, y as f64))
    }

    fn assert_close(actual: f64, expected: f64, rel: f64) {
        let scale = expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() <= rel * scale,
            "{} not within {} of {}",
            actual,
            rel,
            expected
        );
    }

    #[test]
    fn recovers_noise_free_gaussian() {
        let truth = FitParams {
            amplitude: 100.0,
            x_mean: 9.3,
            y_mean: 14.7,
            x_width: 3.0,
            y_width: 4.5,
            offset: 5.0,
        };
        let data = synthetic(&truth, 20, 30);

        let fit = GaussianFitter::default().fit(&data).unwrap();
        assert!(fit.converged);
        assert_close(fit.params.amplitude, truth.amplitude, 1e-4);
        assert_close(fit.params.x_mean, truth.x_mean, 1e-4);
        assert_close(fit.params.y_mean, truth.y_mean, 1e-4);
        assert_close(fit.params.x_width, truth.x_width, 1e-4);
        assert_close(fit.params.y_width, truth.y_width, 1e-4);
        assert_close(fit.params.offset, truth.offset, 1e-4);
    }

    #[test]
    fn initial_guess_is_near_centroid() {
        let truth = FitParams {
            amplitude: 50.0,
            x_mean: 12.0,
            y_mean: 8.0,
            x_width: 2.0,
            y_width: 2.0,
            offset: 0.0,
        };
        let guess = initial_guess(&synthetic(&truth, 24, 16));
        assert!((guess.x_mean - 12.0).abs() < 0.1);
        assert!((guess.y_mean - 8.0).abs() < 0.1);
        assert!((guess.x_width - 2.0).abs() < 0.5);
        assert!(guess.amplitude > 45.0);
    }

    #[test]
    fn flat_image_is_an_exact_fit() {
        let data = Array2::from_elem((5, 5), 7.0);
        let fit = GaussianFitter::default().fit(&data).unwrap();
        assert_eq!(fit.params.offset, 7.0);
        assert_eq!(fit.params.amplitude, 0.0);
        assert_eq!(fit.iterations, 0);
    }

    #[test]
    fn iteration_cap_yields_best_effort() {
        let truth = FitParams {
            amplitude: 80.0,
            x_mean: 6.2,
            y_mean: 9.1,
            x_width: 2.5,
            y_width: 3.5,
            offset: 2.0,
        };
        let data = Array2::from_shape_fn((14, 18), |(x, y)| {
            truth.evaluate(x as f64, y as f64) + ((x * 7 + y * 13) % 5) as f64
        });
        let fitter = GaussianFitter::new(LmConfig {
            max_iterations: 1,
            ..LmConfig::default()
        });

        let err = fitter.fit(&data).unwrap_err();
        let best = err.best_effort();
        assert!(!best.converged);
        assert_eq!(best.iterations, 1);
        assert!(best.chi2.is_finite());
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn tiny_crop_does_not_fit() {
        let data = Array2::from_elem((2, 2), 1.0);
        assert!(GaussianFitter::default().fit(&data).is_err());
    }

    #[test]
    fn frame_coordinates_offset_by_roi_origin() {
        let params = FitParams {
            amplitude: 1.0,
            x_mean: 2.0,
            y_mean: 3.0,
            x_width: 1.0,
            y_width: 1.0,
            offset: 0.0,
        };
        let roi = Roi::new(10, 20, 5, 15).unwrap();
        let framed = params.in_frame_coordinates(&roi);
        assert_eq!(framed.x_mean, 12.0);
        assert_eq!(framed.y_mean, 8.0);
        assert_eq!(framed.amplitude, 1.0);
    }

    #[test]
    fn solver_handles_pivoting() {
        let mut a = [[0.0; N_PARAMS]; N_PARAMS];
        for i in 0..N_PARAMS {
            a[i][(i + 1) % N_PARAMS] = (i + 2) as f64;
        }
        let b = [2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let x = solve(&a, &b).unwrap();
        for i in 0..N_PARAMS {
            assert!((x[(i + 1) % N_PARAMS] - 1.0).abs() < 1e-12);
        }
        assert!(solve(&[[0.0; N_PARAMS]; N_PARAMS], &b).is_none());
    }
}
