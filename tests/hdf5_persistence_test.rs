//! HDF5 store integration tests
//!
//! Runs a scan session into a temporary HDF5 file and reads the layout back.

#![cfg(feature = "storage_hdf5")]

use camera_daq::data::pairing::BackgroundMode;
use camera_daq::data::roi::Roi;
use camera_daq::data::scan_schedule::ScanSchedule;
use camera_daq::hardware::mock::{FramePattern, MockCameraConfig, MockRingBufferCamera};
use camera_daq::session::consumer::{AcquisitionConsumer, LoggingSink};
use camera_daq::session::{AcquisitionMode, AcquisitionSettings, SessionController, SessionEnd};
use camera_daq::storage::hdf5_writer::Hdf5FrameStore;
use camera_daq::storage::RunDescriptor;
use hdf5::types::VarLenUnicode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn settings(fit: bool) -> AcquisitionSettings {
    let mut settings = AcquisitionSettings {
        settle_delay: Duration::ZERO,
        background: BackgroundMode::Captured,
        ..AcquisitionSettings::default()
    };
    settings.fit.enabled = fit;
    settings
}

#[tokio::test]
async fn test_scan_run_layout_and_attributes() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("images.h5");

    let camera = MockRingBufferCamera::new(MockCameraConfig::with_dims(4, 3))
        .with_pattern(FramePattern::Scripted(vec![vec![1; 12], vec![4; 12]]));
    let schedule =
        Arc::new(ScanSchedule::new("Laser", "detuning", "MHz", [(1, 0.5), (2, 1.5)]).unwrap());
    let mut controller = SessionController::new(Box::new(camera), settings(false));

    let rx = controller
        .start(AcquisitionMode::Scan(schedule), 2, Roi::new(1, 3, 0, 2).unwrap())
        .unwrap();
    let run = RunDescriptor::starting_now(controller.session().unwrap());
    let run_name = run.name.clone();
    let report = AcquisitionConsumer::new(LoggingSink::new())
        .with_store(Box::new(Hdf5FrameStore::new(&path, 4)))
        .run(run, rx)
        .await;

    assert!(matches!(report.end, Some(SessionEnd::Completed { pairs: 2 })));
    assert_eq!(report.persisted, 2);
    assert_eq!(report.persistence_failures, 0);

    let file = hdf5::File::open(&path).unwrap();
    let run_group = file.group(&run_name).unwrap();
    assert_eq!(run_group.attr("frame_count").unwrap().read_scalar::<u64>().unwrap(), 2);
    assert_eq!(run_group.attr("roi_xmin").unwrap().read_scalar::<u64>().unwrap(), 1);
    let device: VarLenUnicode = run_group.attr("scan_device").unwrap().read_scalar().unwrap();
    assert_eq!(device.as_str(), "Laser");

    let point = run_group.group("detuning_1.5").unwrap();
    assert_eq!(point.attr("value").unwrap().read_scalar::<f64>().unwrap(), 1.5);
    let unit: VarLenUnicode = point.attr("unit").unwrap().read_scalar().unwrap();
    assert_eq!(unit.as_str(), "MHz");

    let dataset = point.dataset("image_000002").unwrap();
    assert_eq!(dataset.shape(), vec![2, 2]);
    let values = dataset.read_raw::<f64>().unwrap();
    assert!(values.iter().all(|&v| v == 3.0));
    assert_eq!(
        dataset.attr("scalar_count").unwrap().read_scalar::<f64>().unwrap(),
        12.0
    );
    assert!(dataset.attr("amp").is_err());

    assert!(run_group.group("detuning_0.5").unwrap().dataset("image_000001").is_ok());
}

#[tokio::test]
async fn test_runs_accumulate_in_one_file_with_fit_attributes() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("images.h5");

    let spot = FramePattern::GaussianSpot {
        amplitude: 100.0,
        x_center: 5.0,
        y_center: 5.0,
        x_width: 1.5,
        y_width: 1.5,
        offset: 2.0,
        noise: 0.0,
    };
    let camera = MockRingBufferCamera::new(MockCameraConfig::with_dims(10, 10)).with_pattern(spot);
    let mut acquisition = settings(true);
    acquisition.background = BackgroundMode::Zeroed;
    let mut controller = SessionController::new(Box::new(camera), acquisition);
    let store = Hdf5FrameStore::new(&path, 0);

    let rx = controller
        .start(AcquisitionMode::Record, 1, Roi::full((10, 10)))
        .unwrap();
    let first = RunDescriptor::new(
        controller.session().unwrap(),
        &chrono::Local::now(),
    );
    let first_name = first.name.clone();
    let report = AcquisitionConsumer::new(LoggingSink::new())
        .with_store(Box::new(store))
        .run(first, rx)
        .await;
    assert_eq!(report.persisted, 1);
    controller.wait().await;

    let file = hdf5::File::open(&path).unwrap();
    let dataset = file
        .group(&first_name)
        .unwrap()
        .dataset("image_000001")
        .unwrap();
    let x_mean = dataset.attr("x_mean").unwrap().read_scalar::<f64>().unwrap();
    assert!((x_mean - 5.0).abs() < 0.1);
    assert!(dataset.attr("fit_converged").is_ok());
    drop(file);

    // A second run with a distinct name lands in the same file.
    let rx = controller
        .start(AcquisitionMode::Record, 1, Roi::full((10, 10)))
        .unwrap();
    let mut second = RunDescriptor::starting_now(controller.session().unwrap());
    second.name = format!("{}_b", first_name);
    let second_name = second.name.clone();
    let report = AcquisitionConsumer::new(LoggingSink::new())
        .with_store(Box::new(Hdf5FrameStore::new(&path, 0)))
        .run(second, rx)
        .await;
    assert_eq!(report.persisted, 1);

    let file = hdf5::File::open(&path).unwrap();
    assert!(file.group(&first_name).is_ok());
    assert!(file.group(&second_name).is_ok());
}
