//! # Camera DAQ Core Library
//!
//! Real-time acquisition controller for a ring-buffer scientific camera. Each session
//! captures alternating background and signal frames, subtracts them, reduces a region
//! of interest to a scalar count and aggregates the results, either as a running mean
//! (record mode) or grouped by a scanned parameter (scan mode). An optional 2-D Gaussian
//! fit characterises the spot inside the ROI, and every processed frame can be appended
//! to an HDF5 file.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (`config/default.toml` plus `CAMERA_DAQ_*`
//!   environment overrides) and validation.
//! - **`data`**: Frame processing: orientation, pairing and subtraction, ROI, record and
//!   scan aggregation, Gaussian fitting, scan schedules.
//! - **`error`**: The `DaqError` enum shared by the whole crate.
//! - **`hardware`**: Camera capability traits and the mock ring-buffer camera.
//! - **`session`**: Session controller, readout loop and event consumer.
//! - **`storage`**: Frame stores (HDF5 and in-memory) and the on-disk layout.
//! - **`tracing_setup`**: Structured logging initialisation.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod session;
pub mod storage;
pub mod tracing_setup;

pub use config::AppConfig;
pub use error::{AppResult, DaqError};
pub use session::{AcquisitionEvent, AcquisitionMode, ProcessedResult, SessionController, SessionEnd};
