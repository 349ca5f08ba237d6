//! Per-pair processing: ROI extraction, aggregation and the optional fit.

use tracing::warn;

use super::events::ProcessedResult;
use super::AcquisitionMode;
use crate::data::aggregate::{aggregator_for, Aggregator};
use crate::data::gaussian_fit::GaussianFitter;
use crate::data::pairing::FramePair;
use crate::data::roi::Roi;
use crate::error::{AppResult, DaqError};

/// Turns completed pairs into [`ProcessedResult`]s.
pub struct PairProcessor {
    roi: Roi,
    aggregator: Box<dyn Aggregator>,
    fitter: Option<GaussianFitter>,
}

impl PairProcessor {
    /// Fresh processor for a session in `mode`. `fitter` is `None` when fitting is off.
    pub fn new(mode: &AcquisitionMode, roi: Roi, fitter: Option<GaussianFitter>) -> Self {
        Self {
            roi,
            aggregator: aggregator_for(mode),
            fitter,
        }
    }

    /// Process one pair.
    ///
    /// Fails on a ROI outside the frame or a pair index missing from the scan schedule.
    /// A non-converged fit is not an error; its best-effort parameters are kept.
    pub fn process(&mut self, pair: FramePair) -> AppResult<ProcessedResult> {
        let (roi_crop, scalar_count) = self.roi.extract(&pair.subtracted)?;
        let aggregate = self
            .aggregator
            .push(pair.pair_index, &pair.subtracted, scalar_count)?;

        let fit = self.fitter.as_ref().map(|fitter| match fitter.fit(&roi_crop) {
            Ok(fit) => fit,
            Err(non_convergence) => {
                let best_effort = non_convergence.best_effort();
                let error = DaqError::from(non_convergence);
                warn!(pair = pair.pair_index, %error, "Keeping best-effort fit parameters");
                best_effort
            }
        });

        Ok(ProcessedResult {
            sequence_index: pair.pair_index,
            signal: pair.signal,
            subtracted_image: pair.subtracted,
            roi: self.roi,
            roi_crop,
            scalar_count,
            aggregate,
            fit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::aggregate::AggregateSnapshot;
    use crate::data::gaussian_fit::{FitParams, LmConfig};
    use crate::data::pairing::{BackgroundMode, FramePairer, PairOutcome};
    use crate::data::scan_schedule::ScanSchedule;
    use ndarray::Array2;
    use std::sync::Arc;

    fn pair_from(pairer: &mut FramePairer, ordinal: u64, bg: f64, signal: Array2<f64>) -> FramePair {
        pairer.accept(ordinal, Array2::from_elem(signal.dim(), bg)).unwrap();
        match pairer.accept(ordinal + 1, signal).unwrap() {
            PairOutcome::Pair(pair) => pair,
            PairOutcome::BackgroundStored(_) => panic!("expected a pair"),
        }
    }

    #[test]
    fn record_pair_produces_crop_count_and_mean() {
        let roi = Roi::new(1, 3, 0, 2).unwrap();
        let mut processor = PairProcessor::new(&AcquisitionMode::Record, roi, None);
        let mut pairer = FramePairer::new(BackgroundMode::Captured);

        let pair = pair_from(&mut pairer, 1, 1.0, Array2::from_elem((4, 4), 3.0));
        let result = processor.process(pair).unwrap();

        assert_eq!(result.sequence_index, 1);
        assert_eq!(result.roi_crop.dim(), (2, 2));
        assert_eq!(result.scalar_count, 8.0);
        assert_eq!(result.signal.image, Array2::from_elem((4, 4), 3.0));
        assert!(result.fit.is_none());
        let AggregateSnapshot::Record(snap) = &result.aggregate else {
            panic!("record snapshot expected");
        };
        assert_eq!(snap.mean_image, Array2::from_elem((4, 4), 2.0));
    }

    #[test]
    fn scan_pair_outside_schedule_fails() {
        let schedule = Arc::new(ScanSchedule::new("d", "p", "u", [(2, 1.0)]).unwrap());
        let roi = Roi::full((2, 2));
        let mut processor = PairProcessor::new(&AcquisitionMode::Scan(schedule), roi, None);
        let mut pairer = FramePairer::new(BackgroundMode::Zeroed);

        let pair = pair_from(&mut pairer, 1, 0.0, Array2::zeros((2, 2)));
        assert!(matches!(
            processor.process(pair),
            Err(DaqError::UnknownScanIndex(1))
        ));
    }

    #[test]
    fn non_converged_fit_keeps_best_effort() {
        let truth = FitParams {
            amplitude: 40.0,
            x_mean: 5.0,
            y_mean: 6.0,
            x_width: 2.0,
            y_width: 3.0,
            offset: 1.0,
        };
        let signal = Array2::from_shape_fn((12, 12), |(x, y)| {
            truth.evaluate(x as f64, y as f64) + ((x * 3 + y * 5) % 4) as f64
        });
        let fitter = GaussianFitter::new(LmConfig {
            max_iterations: 1,
            ..LmConfig::default()
        });
        let mut processor =
            PairProcessor::new(&AcquisitionMode::Record, Roi::full((12, 12)), Some(fitter));
        let mut pairer = FramePairer::new(BackgroundMode::Zeroed);

        let result = processor
            .process(pair_from(&mut pairer, 1, 0.0, signal))
            .unwrap();
        let fit = result.fit.unwrap();
        assert!(!fit.converged);
        assert!(fit.params.amplitude.is_finite());
    }
}
