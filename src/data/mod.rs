//! Frame processing: orientation, pairing, ROI statistics, aggregation and fitting.
pub mod aggregate;
pub mod gaussian_fit;
pub mod image;
pub mod pairing;
pub mod roi;
pub mod scan_schedule;
