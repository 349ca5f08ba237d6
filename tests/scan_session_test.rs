//! Integration tests for scan-mode acquisition sessions
//!
//! Each pair is assigned a parameter value from the scan schedule; the aggregate groups
//! scalar counts by value and reports mean and standard error per group.

use camera_daq::data::aggregate::{AggregateSnapshot, ScanSnapshot};
use camera_daq::data::pairing::BackgroundMode;
use camera_daq::data::roi::Roi;
use camera_daq::data::scan_schedule::ScanSchedule;
use camera_daq::hardware::mock::{FramePattern, MockCameraConfig, MockRingBufferCamera};
use camera_daq::session::consumer::{AcquisitionConsumer, LoggingSink};
use camera_daq::session::{
    AcquisitionEvent, AcquisitionMode, AcquisitionSettings, ProcessedResult, SessionController,
    SessionEnd,
};
use camera_daq::storage::memory::MemoryFrameStore;
use camera_daq::storage::RunDescriptor;
use camera_daq::DaqError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn settings() -> AcquisitionSettings {
    AcquisitionSettings {
        settle_delay: Duration::ZERO,
        background: BackgroundMode::Zeroed,
        ..AcquisitionSettings::default()
    }
}

/// 2x2 camera whose k-th signal frame reads `k` on every pixel (count `4 * k`).
fn counting_camera(pairs: u16) -> MockRingBufferCamera {
    let frames = (1..=pairs)
        .flat_map(|k| [vec![0u16; 4], vec![k; 4]])
        .collect();
    MockRingBufferCamera::new(MockCameraConfig::with_dims(2, 2))
        .with_pattern(FramePattern::Scripted(frames))
}

fn schedule(values: &[(u32, f64)]) -> Arc<ScanSchedule> {
    Arc::new(ScanSchedule::new("Laser", "detuning", "MHz", values.iter().copied()).unwrap())
}

async fn results_and_end(
    mut rx: mpsc::Receiver<AcquisitionEvent>,
) -> (Vec<Arc<ProcessedResult>>, SessionEnd) {
    let mut results = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            AcquisitionEvent::Processed(result) => results.push(result),
            AcquisitionEvent::Finished(end) => return (results, end),
            AcquisitionEvent::BackgroundCaptured(_) => {}
        }
    }
    panic!("event stream closed without Finished");
}

fn scan_snapshot(result: &ProcessedResult) -> &ScanSnapshot {
    match &result.aggregate {
        AggregateSnapshot::Scan(scan) => scan,
        AggregateSnapshot::Record(_) => panic!("scan snapshot expected"),
    }
}

#[tokio::test]
async fn test_scan_groups_by_parameter_value() {
    let schedule = schedule(&[(1, 2.0), (2, 1.0), (3, 2.0), (4, 1.0)]);
    let mut controller = SessionController::new(Box::new(counting_camera(4)), settings());

    let rx = controller
        .start(AcquisitionMode::Scan(schedule), 4, Roi::full((2, 2)))
        .unwrap();
    let (results, end) = results_and_end(rx).await;

    assert!(matches!(end, SessionEnd::Completed { pairs: 4 }));
    let counts: Vec<f64> = results.iter().map(|r| r.scalar_count).collect();
    assert_eq!(counts, vec![4.0, 8.0, 12.0, 16.0]);

    let labels: Vec<&str> = results
        .iter()
        .map(|r| r.scan_point().unwrap().label.as_str())
        .collect();
    assert_eq!(labels, vec!["2", "1", "2", "1"]);

    // After the first pair only one group exists.
    let first = scan_snapshot(&results[0]);
    assert_eq!(first.summary.len(), 1);
    assert_eq!(first.summary[0].stderr, 0.0);

    let last = scan_snapshot(&results[3]);
    let values: Vec<f64> = last.summary.iter().map(|row| row.value).collect();
    assert_eq!(values, vec![1.0, 2.0]);

    let low = &last.summary[0];
    assert_eq!(low.count, 2);
    assert_eq!(low.mean, 12.0);
    assert!((low.stderr - 4.0 / 2f64.sqrt()).abs() < 1e-12);

    let high = &last.summary[1];
    assert_eq!(high.count, 2);
    assert_eq!(high.mean, 8.0);
    assert!((high.stderr - 4.0 / 2f64.sqrt()).abs() < 1e-12);
}

#[tokio::test]
async fn test_unknown_scan_index_aborts_session() {
    let schedule = schedule(&[(1, 0.5), (2, 1.5)]);
    let camera = counting_camera(3);
    let probe = camera.probe();
    let mut controller = SessionController::new(Box::new(camera), settings());

    let rx = controller
        .start(AcquisitionMode::Scan(schedule), 3, Roi::full((2, 2)))
        .unwrap();
    let (results, end) = results_and_end(rx).await;
    controller.wait().await;

    assert_eq!(results.len(), 2);
    match end {
        SessionEnd::Aborted { pairs, error } => {
            assert_eq!(pairs, 2);
            assert!(matches!(error, DaqError::UnknownScanIndex(3)));
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert!(!controller.is_active());
    assert!(probe.stop_count() >= 1);
}

#[tokio::test]
async fn test_scan_frames_persist_under_parameter_groups() {
    let schedule = schedule(&[(1, -5.0), (2, 5.0)]);
    let mut controller = SessionController::new(Box::new(counting_camera(2)), settings());
    let store = MemoryFrameStore::new();

    let rx = controller
        .start(AcquisitionMode::Scan(schedule), 2, Roi::full((2, 2)))
        .unwrap();
    let run = RunDescriptor::starting_now(controller.session().unwrap());
    let run_name = run.name.clone();
    let report = AcquisitionConsumer::new(LoggingSink::new())
        .with_store(Box::new(store.clone()))
        .run(run, rx)
        .await;

    assert_eq!(report.persisted, 2);
    let runs = store.runs();
    let scan = runs[0].scan.as_ref().unwrap();
    assert_eq!(scan.parameter, "detuning");
    assert_eq!(scan.unit, "MHz");

    let paths: Vec<String> = store.frames().into_iter().map(|f| f.path).collect();
    assert_eq!(
        paths,
        vec![
            format!("{}/detuning_-5/image_000001", run_name),
            format!("{}/detuning_5/image_000002", run_name),
        ]
    );
}
