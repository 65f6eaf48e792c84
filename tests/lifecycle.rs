use std::sync::Arc;

use hikcam::sdk::sim::{FrameGeometry, SimOp, SimulatedSdk};
use hikcam::sdk::{FrameInfo, RawFrame};
use hikcam::{Camera, CameraError, Config, LifecycleState, PixelFormat, StatusCode};

const SERIAL: &str = "X";

fn geometry() -> FrameGeometry {
    FrameGeometry {
        width: 8,
        height: 4,
        format: PixelFormat::Mono8,
    }
}

fn setup_with(config: Config) -> (Arc<SimulatedSdk>, Camera<SimulatedSdk>) {
    let sdk = Arc::new(SimulatedSdk::new());
    sdk.add_device(SERIAL, geometry());
    let camera = Camera::new(Arc::clone(&sdk), &config);
    (sdk, camera)
}

fn setup() -> (Arc<SimulatedSdk>, Camera<SimulatedSdk>) {
    setup_with(Config::default())
}

fn info(frame_num: u32) -> FrameInfo {
    FrameInfo {
        width: 8,
        height: 4,
        pixel_format: PixelFormat::Mono8.pfnc(),
        frame_num,
        dev_timestamp: 0,
    }
}

fn streaming() -> (Arc<SimulatedSdk>, Camera<SimulatedSdk>) {
    let (sdk, camera) = setup();
    camera.open(SERIAL, None).unwrap();
    camera.start().unwrap();
    (sdk, camera)
}

#[test]
fn ten_frames_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("cfg");
    std::fs::write(&cfg, "ExposureTime = 8000\n").unwrap();

    let mut config = Config::default();
    config.buffer.capacity = 10;
    let (sdk, camera) = setup_with(config);

    camera.open(SERIAL, Some(&cfg)).unwrap();
    assert_eq!(sdk.features(SERIAL)["ExposureTime"], "8000");
    camera.start().unwrap();

    for n in 1..=10u32 {
        let payload = vec![n as u8; 32];
        assert!(sdk.inject_frame(SERIAL, &payload, info(n)));
    }

    for n in 1..=10u32 {
        let frame = camera.get_image().expect("frame should be queued");
        assert_eq!(frame.meta.frame_num, n);
        assert_eq!(frame.sequence(), u64::from(n));
        assert!(frame.as_bytes().iter().all(|&b| b == n as u8));
    }

    camera.stop().unwrap();
    assert!(camera.get_image().is_none());
    camera.close().unwrap();

    assert_eq!(camera.state(), LifecycleState::Closed);
    assert_eq!(camera.serial_number(), SERIAL);
    assert_eq!(sdk.open_handles(SERIAL), 0);
    assert_eq!(sdk.invalid_handle_uses(), 0);
}

#[test]
fn overflow_keeps_the_newest_frames() {
    let (sdk, camera) = streaming();
    for _ in 0..7 {
        assert!(sdk.emit_frame(SERIAL));
    }

    let nums: Vec<u32> = std::iter::from_fn(|| camera.get_image())
        .map(|f| f.meta.frame_num)
        .collect();
    assert_eq!(nums, vec![4, 5, 6, 7]);
    assert_eq!(camera.stats().frames_overwritten, 3);
}

#[test]
fn second_start_fails_and_keeps_one_registration() {
    let (sdk, camera) = streaming();

    let err = camera.start().unwrap_err();
    assert!(matches!(err, CameraError::AlreadyStreaming));
    assert!(err.is_precondition());
    assert_eq!(camera.state(), LifecycleState::Streaming);
    assert_eq!(sdk.registered_callbacks(SERIAL), 1);
    assert_eq!(sdk.calls(SimOp::RegisterCallback), 1);
    assert_eq!(sdk.calls(SimOp::StartGrab), 1);
}

#[test]
fn closed_camera_fails_without_calling_the_sdk() {
    let (sdk, camera) = setup();
    let dir = tempfile::tempdir().unwrap();

    assert!(camera.get_image().is_none());
    assert!(matches!(camera.stop(), Err(CameraError::NotOpen)));
    assert!(matches!(camera.start(), Err(CameraError::NotOpen)));
    assert!(matches!(
        camera.export_config(dir.path().join("out.txt")),
        Err(CameraError::NotOpen)
    ));
    assert!(matches!(
        camera.import_config(dir.path().join("in.txt")),
        Err(CameraError::NotOpen)
    ));
    assert!(matches!(camera.close(), Err(CameraError::NotOpen)));
    assert!(!camera.is_connected());

    assert_eq!(sdk.total_calls(), 0);
    assert_eq!(camera.state(), LifecycleState::Closed);
}

#[test]
fn stop_outside_streaming_is_rejected() {
    let (sdk, camera) = setup();
    camera.open(SERIAL, None).unwrap();
    assert!(matches!(camera.stop(), Err(CameraError::NotStreaming)));
    assert_eq!(sdk.calls(SimOp::StopGrab), 0);
    assert_eq!(camera.state(), LifecycleState::Opened);
}

#[test]
fn close_always_ends_closed() {
    let (sdk, camera) = streaming();
    sdk.emit_frame(SERIAL);
    sdk.fail(SimOp::Close, StatusCode::UNKNOWN);

    let err = camera.close().unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNKNOWN));
    assert_eq!(camera.state(), LifecycleState::Closed);
    assert_eq!(sdk.open_handles(SERIAL), 0);
    assert!(camera.get_image().is_none());

    sdk.clear_failure(SimOp::Close);
    camera.open(SERIAL, None).unwrap();
    assert_eq!(camera.state(), LifecycleState::Opened);
}

#[test]
fn close_from_streaming_stops_first() {
    let (sdk, camera) = streaming();
    camera.close().unwrap();

    assert_eq!(sdk.calls(SimOp::StopGrab), 1);
    assert_eq!(sdk.calls(SimOp::DeregisterCallback), 1);
    assert_eq!(sdk.registered_callbacks(SERIAL), 0);
    assert!(!sdk.emit_frame(SERIAL));
}

#[test]
fn stop_leaves_unread_frames_available() {
    let (sdk, camera) = streaming();
    for _ in 0..3 {
        sdk.emit_frame(SERIAL);
    }
    camera.stop().unwrap();
    assert!(!sdk.emit_frame(SERIAL));

    assert_eq!(camera.get_image().map(|f| f.meta.frame_num), Some(1));
    assert_eq!(camera.get_image().map(|f| f.meta.frame_num), Some(2));
    assert_eq!(camera.get_image().map(|f| f.meta.frame_num), Some(3));
    assert!(camera.get_image().is_none());
}

#[test]
fn restart_discards_frames_from_the_previous_stream() {
    let (sdk, camera) = streaming();
    sdk.emit_frame(SERIAL);
    sdk.emit_frame(SERIAL);
    camera.stop().unwrap();
    camera.start().unwrap();
    assert!(camera.get_image().is_none());

    sdk.emit_frame(SERIAL);
    let frame = camera.get_image().unwrap();
    assert_eq!(frame.meta.frame_num, 3);
    assert_eq!(frame.sequence(), 3);
}

#[test]
fn callback_arriving_after_stop_is_ignored() {
    let (sdk, camera) = streaming();
    let callback = sdk.callback(SERIAL).expect("registered callback");
    camera.stop().unwrap();

    let payload = [0u8; 32];
    callback(RawFrame {
        data: &payload,
        info: info(99),
    });

    assert!(camera.get_image().is_none());
    assert_eq!(camera.stats().frames_late, 1);
    assert_eq!(sdk.invalid_handle_uses(), 0);
}

#[test]
fn failed_open_stays_closed() {
    let (sdk, camera) = setup();
    let err = camera.open("missing", None).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INVALID_PARAMETER));
    assert_eq!(camera.state(), LifecycleState::Closed);
    assert_eq!(camera.serial_number(), "");
    assert_eq!(sdk.open_handles(SERIAL), 0);
}

#[test]
fn missing_feature_file_is_tolerated_by_default() {
    let (_sdk, camera) = setup();
    camera
        .open(SERIAL, Some(std::path::Path::new("/nonexistent/cfg.txt")))
        .unwrap();
    assert_eq!(camera.state(), LifecycleState::Opened);
}

#[test]
fn missing_feature_file_fails_open_when_required() {
    let mut config = Config::default();
    config.camera.require_feature_import = true;
    let (sdk, camera) = setup_with(config);

    let err = camera
        .open(SERIAL, Some(std::path::Path::new("/nonexistent/cfg.txt")))
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INVALID_PARAMETER));
    assert_eq!(camera.state(), LifecycleState::Closed);
    assert_eq!(sdk.open_handles(SERIAL), 0);
}

#[test]
fn export_then_import_restores_features() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("X.txt");
    let (sdk, camera) = setup();
    camera.open(SERIAL, None).unwrap();

    sdk.set_feature(SERIAL, "Gain", "12");
    camera.export_config(&path).unwrap();
    sdk.set_feature(SERIAL, "Gain", "0");
    camera.import_config(&path).unwrap();
    assert_eq!(sdk.features(SERIAL)["Gain"], "12");

    sdk.fail(SimOp::SaveConfig, StatusCode::RESOURCE);
    let err = camera.export_config(&path).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::RESOURCE));
    assert_eq!(camera.state(), LifecycleState::Opened);
}

#[test]
fn corrupt_frames_are_dropped_and_counted() {
    let (sdk, camera) = streaming();
    assert!(sdk.inject_frame(SERIAL, &[0u8; 5], info(1)));
    sdk.emit_frame(SERIAL);

    assert!(camera.get_image().is_some());
    assert!(camera.get_image().is_none());
    let stats = camera.stats();
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.frames_rejected, 1);
}

#[test]
fn is_connected_reflects_the_link() {
    let (sdk, camera) = setup();
    camera.open(SERIAL, None).unwrap();
    assert!(camera.is_connected());
    sdk.set_link(SERIAL, false);
    assert!(!camera.is_connected());
}
