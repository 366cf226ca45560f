//! End-to-end event lifecycle: a mock capture driver feeds frames through a
//! `CameraPipeline` running on its own thread exactly as `main.rs` spawns
//! it, the resulting movie lands in the `MetadataStore`, and the web
//! control plane serves it back out over HTTP.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use motionplus::action::{ActionDispatch, PipelineFlags};
use motionplus::auth::LockoutTracker;
use motionplus::capture::mock::MockCaptureDriver;
use motionplus::capture::CaptureDriver;
use motionplus::config::{CameraConfig, Config};
use motionplus::db::MetadataStore;
use motionplus::logbuf::LogRingBuffer;
use motionplus::motion::MotionConfig;
use motionplus::pipeline::CameraPipeline;
use motionplus::streaming::hub::StreamingHub;
use motionplus::streaming::http::{build_router, AppState};
use motionplus::watchdog::ThreadHandle;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn camera_cfg(device_id: u32, emulate_motion: bool) -> CameraConfig {
    CameraConfig {
        device_id,
        name: "driveway".into(),
        device: "mock".into(),
        width: 4,
        height: 4,
        framerate: 500,
        pre_capture: 1,
        post_capture: 1,
        threshold: 1,
        threshold_maximum: 0,
        event_gap: 0,
        minimum_motion_frames: 1,
        emulate_motion,
        pause: false,
        mosaic_row: 1,
        mosaic_col: 1,
        mosaic_scale: 100,
    }
}

fn canned_frames(n: usize) -> Vec<Vec<u8>> {
    vec![vec![0x80u8; 4 * 4 + 2 * 2 * 2]; n]
}

/// Drives a camera pipeline through `emulate_motion`: the pipeline thread
/// opens an event on its first frame and, once the test flips
/// `event_stop`, finalizes it into a muxed movie. Confirms the movie shows
/// up both in the `MetadataStore` and over `/movies.json`.
#[tokio::test]
async fn recorded_event_is_served_over_movies_json() {
    let driver: Box<dyn CaptureDriver> = Box::new(MockCaptureDriver::new(canned_frames(4), 4, 4));
    let hub = Arc::new(StreamingHub::new());
    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(MetadataStore::new(dir.path()));
    let flags = PipelineFlags::new();
    let handle = ThreadHandle::new();

    let mut motion_cfg = MotionConfig::default();
    motion_cfg.emulate_motion = true;
    motion_cfg.event_gap_secs = 0;

    let cam = camera_cfg(7, true);
    let mut pipeline = CameraPipeline::new(
        cam.clone(),
        motion_cfg,
        driver,
        hub.clone(),
        metadata.clone(),
        flags.clone(),
        handle,
    );

    let join = std::thread::spawn(move || pipeline.run());

    std::thread::sleep(Duration::from_millis(30));
    flags.event_stop.store(true, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(30));
    flags.finish.store(true, Ordering::SeqCst);
    join.join().expect("pipeline thread should not panic");

    let movies = metadata.movies(7);
    assert_eq!(movies.len(), 1, "one event should have closed and been recorded");
    let movie = &movies[0];
    let on_disk = metadata.movie_path(7, &movie.filename).unwrap();
    assert!(on_disk.exists(), "muxed movie file should be written under the metadata root");

    let mut config = Config::default();
    config.cameras.push(cam);
    let mut hubs = HashMap::new();
    hubs.insert(7, hub);

    let state = Arc::new(AppState::new(
        config,
        hubs,
        metadata,
        Arc::new(LogRingBuffer::new(16)),
        ActionDispatch::new(),
        Arc::new(LockoutTracker::new(3, 10)),
    ));
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/7/movies.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let listed: Vec<motionplus::db::MovieRecord> = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].filename, movie.filename);
}

/// §8 scenario 5, driven end to end through `CameraPipeline::run` on its own
/// thread exactly as `main.rs` spawns it: `minimum_motion_frames=3,
/// event_gap=2, pre_capture=4, post_capture=4`, 10 motion frames then 10
/// quiet frames @1fps. Expected total saved = 4 pre-capture + 10 motion + 4
/// post-capture = 18, independent of `event_gap` once closing starts.
#[tokio::test]
async fn scenario_five_records_eighteen_frame_movie() {
    fn solid(value: u8) -> Vec<u8> {
        vec![value; 4 * 4 + 2 * 2 * 2]
    }

    let mut frames = Vec::new();
    frames.extend((0..4).map(|_| solid(0)));
    frames.extend((0..10).map(|_| solid(255)));
    // The reference converges toward 255 by (cur-ref)/16 per frame, landing
    // on 118 after the 10th motion frame; the quiet frames must match that
    // exactly or they'd register as motion themselves.
    frames.extend((0..10).map(|_| solid(118)));

    let driver: Box<dyn CaptureDriver> = Box::new(MockCaptureDriver::new(frames, 4, 4));
    let hub = Arc::new(StreamingHub::new());
    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(MetadataStore::new(dir.path()));
    let flags = PipelineFlags::new();
    let handle = ThreadHandle::new();

    let cam = CameraConfig {
        pre_capture: 4,
        post_capture: 4,
        event_gap: 2,
        minimum_motion_frames: 3,
        framerate: 1,
        ..camera_cfg(11, false)
    };
    let motion_cfg = MotionConfig {
        threshold: 1,
        threshold_maximum: 0,
        minimum_motion_frames: 3,
        event_gap_secs: 2,
        emulate_motion: false,
        ..MotionConfig::default()
    };
    let mut pipeline = CameraPipeline::new(cam, motion_cfg, driver, hub, metadata.clone(), flags.clone(), handle);

    let join = std::thread::spawn(move || pipeline.run());

    // 14 motion-run frames @1fps plus the 2s event-gap and 4 post-capture
    // frames; pad generously since the mock driver idles once exhausted.
    std::thread::sleep(Duration::from_millis(21_000));
    flags.finish.store(true, Ordering::SeqCst);
    join.join().expect("pipeline thread should not panic");

    let movies = metadata.movies(11);
    assert_eq!(movies.len(), 1, "exactly one event should have closed");
    assert_eq!(movies[0].frame_count, 18);
}

/// A camera with `emulate_motion` off and an unreachable threshold never
/// qualifies for motion, so it never opens an event and records nothing.
#[test]
fn quiet_camera_records_no_movies() {
    let driver: Box<dyn CaptureDriver> = Box::new(MockCaptureDriver::new(canned_frames(4), 4, 4));
    let hub = Arc::new(StreamingHub::new());
    let dir = tempfile::tempdir().unwrap();
    let metadata = Arc::new(MetadataStore::new(dir.path()));
    let flags = PipelineFlags::new();
    let handle = ThreadHandle::new();

    let cam = camera_cfg(9, false);
    let motion_cfg = MotionConfig { threshold_maximum: u32::MAX, ..MotionConfig::default() };
    let mut pipeline = CameraPipeline::new(cam, motion_cfg, driver, hub, metadata.clone(), flags.clone(), handle);

    let join = std::thread::spawn(move || pipeline.run());
    std::thread::sleep(Duration::from_millis(30));
    flags.finish.store(true, Ordering::SeqCst);
    join.join().expect("pipeline thread should not panic");

    assert!(metadata.movies(9).is_empty());
}

/// The action-dispatch/auth stack gates every route the same way: an
/// unknown action command is rejected before it ever reaches a camera.
#[tokio::test]
async fn action_route_rejects_unregistered_camera() {
    let state = Arc::new(AppState::new(
        Config::default(),
        HashMap::new(),
        Arc::new(MetadataStore::new(std::env::temp_dir())),
        Arc::new(LogRingBuffer::new(16)),
        ActionDispatch::new(),
        Arc::new(LockoutTracker::new(3, 10)),
    ));
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/0/action")
                .header(axum::http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("command=snapshot&camid=42"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
