//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole acquisition
//! controller. Using the `thiserror` crate, it provides a centralized and consistent way
//! to handle everything that can go wrong, from configuration mistakes to hardware faults
//! in the middle of a session.
//!
//! ## Error Hierarchy
//!
//! `DaqError` consolidates the following categories (see [`ErrorCategory`]):
//!
//! - **Configuration**: `Config`, `Configuration`, `InvalidRoi`, `InvalidConfiguration`
//!   and `AlreadyActive`. These are rejected synchronously at the triggering call and
//!   never disturb a running session.
//! - **Device fault**: `DeviceFault`. The camera reported an error status; the active
//!   session is aborted and the device stopped.
//! - **Schedule**: `UnknownScanIndex`, `Schedule`. A scan schedule could not be read or
//!   has no entry for the current sequence index; the session is aborted.
//! - **Fit non-convergence**: `FitNonConvergence`. Never fatal, the frame keeps the
//!   best-effort parameters.
//! - **Persistence**: `Persistence`, `Hdf5`, `FeatureNotEnabled`. Logged by the
//!   consumer, the session continues and only that frame's on-disk copy is lost.
//! - **Internal**: `Io`, `Processing`.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! which keeps `?` usable throughout the crate.

use crate::data::gaussian_fit::FitNonConvergence;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the acquisition controller.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration sources could not be parsed or merged.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Region of interest is empty, inverted, or exceeds the frame.
    #[error("Invalid ROI: {0}")]
    InvalidRoi(String),

    /// A camera setter rejected the requested value.
    #[error("Invalid camera configuration: {0}")]
    InvalidConfiguration(String),

    /// A session is already running.
    #[error("An acquisition session is already active")]
    AlreadyActive,

    /// The camera reported an error status.
    #[error("Device fault: {0}")]
    DeviceFault(String),

    /// The scan schedule has no entry for this sequence index.
    #[error("No scan schedule entry for sequence index {0}")]
    UnknownScanIndex(u32),

    /// The scan schedule could not be loaded.
    #[error("Scan schedule error: {0}")]
    Schedule(String),

    /// Gaussian fit did not converge (best-effort parameters are attached).
    #[error(transparent)]
    FitNonConvergence(#[from] FitNonConvergence),

    /// Writing a frame to the store failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// HDF5 library error.
    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame processing failed (shape mismatch and similar invariants).
    #[error("Data processing error: {0}")]
    Processing(String),

    /// Functionality compiled out by feature flags.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

/// Error taxonomy used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before start; the session is unaffected.
    Configuration,
    /// Hardware error; aborts the active session.
    DeviceFault,
    /// Unmapped scan index or unreadable schedule; aborts the session.
    Schedule,
    /// Non-fatal; best-effort result is kept.
    FitNonConvergence,
    /// Write failure; logged, session continues.
    Persistence,
    /// Anything else.
    Internal,
}

impl DaqError {
    /// Category of this error in the acquisition error taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::InvalidRoi(_)
            | DaqError::InvalidConfiguration(_)
            | DaqError::AlreadyActive => ErrorCategory::Configuration,
            DaqError::DeviceFault(_) => ErrorCategory::DeviceFault,
            DaqError::UnknownScanIndex(_) | DaqError::Schedule(_) => ErrorCategory::Schedule,
            DaqError::FitNonConvergence(_) => ErrorCategory::FitNonConvergence,
            DaqError::Persistence(_) | DaqError::FeatureNotEnabled(_) => {
                ErrorCategory::Persistence
            }
            #[cfg(feature = "storage_hdf5")]
            DaqError::Hdf5(_) => ErrorCategory::Persistence,
            DaqError::Io(_) | DaqError::Processing(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this error terminates an active session when raised inside the acquisition loop.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::FitNonConvergence | ErrorCategory::Persistence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_runtime_failures() {
        assert_eq!(
            DaqError::DeviceFault("readout failed".into()).category(),
            ErrorCategory::DeviceFault
        );
        assert_eq!(
            DaqError::UnknownScanIndex(7).category(),
            ErrorCategory::Schedule
        );
        assert_eq!(
            DaqError::Persistence("disk full".into()).category(),
            ErrorCategory::Persistence
        );
        assert_eq!(DaqError::AlreadyActive.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn only_session_ending_errors_are_fatal() {
        assert!(DaqError::DeviceFault("x".into()).is_fatal());
        assert!(DaqError::UnknownScanIndex(3).is_fatal());
        assert!(!DaqError::Persistence("x".into()).is_fatal());
        assert!(!DaqError::FeatureNotEnabled("storage_hdf5".into()).is_fatal());
    }

    #[test]
    fn display_includes_context() {
        let err = DaqError::UnknownScanIndex(12);
        assert_eq!(err.to_string(), "No scan schedule entry for sequence index 12");

        let err = DaqError::FeatureNotEnabled("storage_hdf5".into());
        assert!(err.to_string().contains("--features storage_hdf5"));
    }
}
