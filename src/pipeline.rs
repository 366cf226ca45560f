//! Camera Pipeline (C5, §4.5): the per-camera worker loop tying capture,
//! pixel conversion, motion detection, the ring buffer, event recording,
//! and the streaming hub together. One instance runs on its own OS thread
//! via `thread::spawn(move || loop { ... })`, spawned once per camera from
//! `main.rs`.

use crate::action::PipelineFlags;
use crate::capture::{CaptureDriver, CaptureOutcome, CaptureParams};
use crate::config::CameraConfig;
use crate::db::{MetadataStore, MovieRecord};
use crate::encoder::{self, Container, MovieHandle, VideoCodec};
use crate::event::Event;
use crate::frame::{Frame, Masks, ReferenceFrame, Yuv420Image};
use crate::motion::{Detector, MotionConfig};
use crate::pixel::PixelConverter;
use crate::ring::RingBuffer;
use crate::streaming::hub::StreamingHub;
use crate::streaming::SlotTag;
use crate::watchdog::ThreadHandle;
use chrono::Utc;
use log::{info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Per-camera runtime state the pipeline owns exclusively (§5: no other
/// thread touches capture/detection state, only the atomics in
/// [`PipelineFlags`] and the mutex-guarded [`StreamingHub`]).
pub struct CameraPipeline {
    camera: CameraConfig,
    driver: Box<dyn CaptureDriver>,
    converter: PixelConverter,
    detector: Detector,
    reference: Option<ReferenceFrame>,
    masks: Masks,
    ring: RingBuffer<Frame>,
    hub: Arc<StreamingHub>,
    metadata: Arc<MetadataStore>,
    flags: Arc<PipelineFlags>,
    handle: Arc<ThreadHandle>,
    event: Option<Event>,
    mux: Option<MovieHandle>,
    /// Set once the event-gap has elapsed; counts down `camera.post_capture`
    /// frames independently of further motion/gap checks before closing.
    closing: bool,
    post_capture_remaining: usize,
    event_number: u64,
    last_event_frame_count: usize,
    shot: u32,
}

impl CameraPipeline {
    pub fn new(
        camera: CameraConfig,
        motion_cfg: MotionConfig,
        driver: Box<dyn CaptureDriver>,
        hub: Arc<StreamingHub>,
        metadata: Arc<MetadataStore>,
        flags: Arc<PipelineFlags>,
        handle: Arc<ThreadHandle>,
    ) -> Self {
        let ring = RingBuffer::new(camera.pre_capture, camera.post_capture);
        CameraPipeline {
            camera,
            driver,
            converter: PixelConverter::new(),
            detector: Detector::new(motion_cfg),
            reference: None,
            masks: Masks::default(),
            ring,
            hub,
            metadata,
            flags,
            handle,
            event: None,
            mux: None,
            closing: false,
            post_capture_remaining: 0,
            event_number: 0,
            last_event_frame_count: 0,
            shot: 0,
        }
    }

    fn capture_params(&self) -> CaptureParams {
        CaptureParams {
            device: self.camera.device.clone(),
            width: self.camera.width,
            height: self.camera.height,
            framerate: self.camera.framerate,
            ..CaptureParams::default()
        }
    }

    /// Runs `init -> (prepare -> capture -> detect -> tune -> overlay ->
    /// actions -> ring_process -> frametiming)* -> cleanup` until
    /// `flags.finish` is set (§4.5). Returns once capture is stopped.
    pub fn run(&mut self) {
        self.handle.mark_started();
        'restart: loop {
            if let Err(e) = self.driver.start(&self.capture_params()) {
                warn!("camera {}: capture start failed: {e}", self.camera.device_id);
            }

            let frame_period = Duration::from_secs_f64(1.0 / self.camera.framerate.max(1) as f64);
            loop {
                if self.flags.finish.load(Ordering::SeqCst) || self.handle.stop_requested() {
                    let _ = self.driver.stop();
                    self.handle.mark_stopped();
                    return;
                }
                if self.flags.restart.swap(false, Ordering::SeqCst) {
                    let _ = self.driver.stop();
                    self.reference = None;
                    continue 'restart;
                }
                if self.flags.pause.load(Ordering::SeqCst) {
                    self.detector.pause();
                    std::thread::sleep(frame_period);
                    continue;
                }
                self.detector.unpause();

                match self.driver.next_frame() {
                    Ok(CaptureOutcome::Ok { data, format, width, height }) => {
                        self.process_one(data, format, width, height);
                    }
                    Ok(CaptureOutcome::Retry) => {}
                    Err(e) => {
                        warn!("camera {}: capture error: {e}", self.camera.device_id);
                        let _ = self.driver.stop();
                        continue 'restart;
                    }
                }

                std::thread::sleep(frame_period);
            }
        }
    }

    fn process_one(&mut self, data: Vec<u8>, format: crate::pixel::SourceFormat, width: u32, height: u32) {
        let image = match self.converter.convert(format, &data, width, height) {
            Ok(image) => image,
            Err(e) => {
                warn!("camera {}: pixel conversion failed: {e}", self.camera.device_id);
                return;
            }
        };
        let mut image = image;
        self.masks.apply_privacy(&mut image);

        self.shot = self.shot.wrapping_add(1);
        let mut frame = Frame::new(image.clone(), monotonic_micros(), self.shot);

        let reference = self
            .reference
            .get_or_insert_with(|| ReferenceFrame::new(image.clone()));

        let outcome = self.detector.process(reference, &frame, &self.masks);
        frame.flags.motion = outcome.qualifies;
        frame.diff.raw = outcome.diffs_raw;
        frame.diff.masked = outcome.diffs;
        frame.diff.ratio = outcome.diffs_ratio;
        let motion_box = if outcome.labels.total_labels > 0 {
            let bbox = outcome.labels.largest_box;
            frame.location.x = bbox.minx;
            frame.location.y = bbox.miny;
            frame.location.w = bbox.width();
            frame.location.h = bbox.height();
            frame.location.minx = bbox.minx;
            frame.location.maxx = bbox.maxx;
            frame.location.miny = bbox.miny;
            frame.location.maxy = bbox.maxy;
            frame.location.stddev_x = outcome.labels.stddev_x;
            frame.location.stddev_y = outcome.labels.stddev_y;
            frame.location.stddev_xy = outcome.labels.stddev_xy;
            Some(bbox)
        } else {
            None
        };

        self.detector.reference_update(
            reference,
            &frame.image.y,
            motion_box.as_ref(),
            self.camera.framerate as f64,
        );

        self.handle_actions(&mut frame);
        self.handle_event_lifecycle(&mut frame, outcome.qualifies);

        self.hub.slot(SlotTag::Full).publish(frame.image.clone());
        self.hub.slot(SlotTag::Source).publish(image);
        if frame.flags.motion {
            self.hub.slot(SlotTag::Motion).publish(frame.image.clone());
        }

        // Anything worth keeping has already been muxed inline by
        // `handle_event_lifecycle`/`feed_mux`, so the ring never needs to
        // hold a frame past its own capacity to protect it from reclaim.
        frame.flags.saved = true;
        self.ring.push(frame);
    }

    fn handle_actions(&mut self, frame: &mut Frame) {
        if self.flags.action_snapshot.swap(false, Ordering::SeqCst) {
            if let Ok(bytes) = encoder::encode_jpeg(&frame.image, 90) {
                let path = self.metadata.root().join(format!("{}-snapshot.jpg", self.camera.device_id));
                if let Err(e) = std::fs::write(&path, bytes) {
                    warn!("camera {}: snapshot write failed: {e}", self.camera.device_id);
                }
            }
        }
        if self.flags.event_user.swap(false, Ordering::SeqCst) {
            frame.flags.trigger = true;
        }
    }

    /// Opens/extends/closes the current [`Event`] per §3/§4.5. Motion frames
    /// (including the retroactively-flagged pre-capture window) are muxed
    /// inline as they're captured; once the event gap elapses, an
    /// independent `post_capture_remaining` counter — seeded once from
    /// `camera.post_capture` and decremented every subsequent frame — keeps
    /// muxing frames until it reaches zero, regardless of `event_gap` or
    /// further motion re-checks.
    fn handle_event_lifecycle(&mut self, frame: &mut Frame, qualifies: bool) {
        let now = Utc::now();
        let forced_stop = self.flags.event_stop.swap(false, Ordering::SeqCst);
        let motion_now = qualifies || frame.flags.trigger;

        if motion_now {
            if self.event.is_none() {
                self.event_number += 1;
                let ev = Event::open(self.camera.device_id, now);
                info!("camera {}: event {} opened", self.camera.device_id, ev.id);
                let mut handle = encoder::mux_movie(Container::Mp4, VideoCodec::H264);
                for f in self.ring.last_n(self.camera.pre_capture) {
                    if let Ok(jpeg) = encoder::encode_jpeg(&f.image, 80) {
                        let _ = handle.write_sample(&jpeg);
                    }
                }
                self.ring.mark_last_n_save(self.camera.pre_capture);
                self.mux = Some(handle);
                self.event = Some(ev);
            }
            if let Some(ev) = self.event.as_mut() {
                ev.record_motion(now);
            }
            frame.flags.save = true;
            frame.flags.trigger = true;
            self.feed_mux(&frame.image);
            self.closing = false;
            self.post_capture_remaining = 0;
        }
        frame.event_number = self.event_number;

        if self.event.is_none() {
            return;
        }
        if forced_stop {
            self.close_event();
            return;
        }
        if motion_now {
            return;
        }

        if !self.closing {
            let gap_elapsed = self
                .event
                .as_ref()
                .map(|ev| ev.should_close(now, self.camera.event_gap))
                .unwrap_or(false);
            if gap_elapsed {
                self.closing = true;
                self.post_capture_remaining = self.camera.post_capture;
            }
        }

        if self.closing {
            if self.post_capture_remaining > 0 {
                frame.flags.save = true;
                frame.flags.postcap = true;
                self.feed_mux(&frame.image);
                self.post_capture_remaining -= 1;
            }
            if self.post_capture_remaining == 0 {
                self.close_event();
            }
        }
    }

    fn feed_mux(&mut self, image: &Yuv420Image) {
        if let Some(handle) = self.mux.as_mut() {
            if let Ok(jpeg) = encoder::encode_jpeg(image, 80) {
                let _ = handle.write_sample(&jpeg);
            }
        }
    }

    fn close_event(&mut self) {
        self.closing = false;
        self.post_capture_remaining = 0;
        if let (Some(ev), Some(handle)) = (self.event.take(), self.mux.take()) {
            self.finalize_event(ev, handle);
        }
        self.detector.advance_to_cooldown();
        self.detector.advance_to_idle();
    }

    fn finalize_event(&mut self, event: Event, handle: MovieHandle) {
        let count = handle.sample_count();
        let Ok(bytes) = handle.finish() else {
            warn!("camera {}: event {} mux failed", self.camera.device_id, event.id);
            return;
        };
        let filename = format!("{}.mp4", event.id);
        let dir = self.metadata.movie_dir(self.camera.device_id);
        if std::fs::create_dir_all(&dir).is_ok() {
            let path = dir.join(&filename);
            let size = bytes.len() as u64;
            if std::fs::write(&path, &bytes).is_ok() {
                let _ = self.metadata.record_movie(
                    self.camera.device_id,
                    MovieRecord {
                        event_id: event.id.clone(),
                        filename,
                        container: "mp4".into(),
                        start_unix: event.start.timestamp(),
                        duration_secs: (event.last_motion - event.start).num_milliseconds() as f64 / 1000.0,
                        size_bytes: size,
                        frame_count: count as u64,
                    },
                );
            }
        }
        self.last_event_frame_count = count;
        info!(
            "camera {}: event {} closed, {} frames muxed",
            self.camera.device_id, event.id, count
        );
    }
}

fn monotonic_micros() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<std::time::Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(std::time::Instant::now);
    epoch.elapsed().as_micros() as u64
}

/// Placeholder `Yuv420Image` published to a Stream Slot before the first
/// frame arrives, kept here rather than in `frame.rs` since only the
/// pipeline's startup path needs it.
pub fn placeholder_image() -> Yuv420Image {
    Yuv420Image::neutral_gray(320, 240)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::MockCaptureDriver;

    fn camera_cfg() -> CameraConfig {
        CameraConfig {
            device_id: 1,
            name: "test".into(),
            device: "mock".into(),
            width: 4,
            height: 4,
            framerate: 1000,
            pre_capture: 1,
            post_capture: 1,
            threshold: 1,
            threshold_maximum: 0,
            event_gap: 0,
            minimum_motion_frames: 1,
            emulate_motion: true,
            pause: false,
            mosaic_row: 1,
            mosaic_col: 1,
            mosaic_scale: 100,
        }
    }

    #[test]
    fn emulate_motion_opens_and_immediately_closes_event_on_stop() {
        let frame = vec![0x80u8; 4 * 4 + 2 * 2 * 2];
        let driver = Box::new(MockCaptureDriver::new(vec![frame.clone(), frame], 4, 4));
        let hub = Arc::new(StreamingHub::new());
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(MetadataStore::new(dir.path()));
        let flags = PipelineFlags::new();
        let handle = ThreadHandle::new();
        let mut cfg = MotionConfig::default();
        cfg.emulate_motion = true;
        cfg.event_gap_secs = 0;
        let mut pipeline = CameraPipeline::new(camera_cfg(), cfg, driver, hub.clone(), metadata, flags.clone(), handle);

        pipeline.driver.start(&pipeline.capture_params()).unwrap();
        if let Ok(CaptureOutcome::Ok { data, format, width, height }) = pipeline.driver.next_frame() {
            pipeline.process_one(data, format, width, height);
        }
        assert!(pipeline.event.is_some());
        flags.event_stop.store(true, Ordering::SeqCst);
        if let Ok(CaptureOutcome::Ok { data, format, width, height }) = pipeline.driver.next_frame() {
            pipeline.process_one(data, format, width, height);
        }
        assert!(pipeline.event.is_none());
    }

    /// §8 scenario 5: `minimum_motion_frames=3, event_gap=2, pre_capture=4,
    /// post_capture=4`, 10 motion frames followed by 10 quiet frames @1fps.
    /// Expected total saved = 4 pre-capture + 10 motion + 4 post-capture = 18,
    /// with post-capture bounded by its own counter rather than `event_gap`.
    #[test]
    fn scenario_five_saves_four_precapture_ten_motion_four_postcapture_frames() {
        fn solid(value: u8) -> Vec<u8> {
            vec![value; 4 * 4 + 2 * 2 * 2]
        }

        let mut frames = Vec::new();
        for _ in 0..4 {
            frames.push(solid(0));
        }
        for _ in 0..10 {
            frames.push(solid(255));
        }
        // The reference converges toward 255 by (cur-ref)/16 per frame,
        // landing on 118 after the 10th motion frame; the quiet frames must
        // match that exactly or they'd register as motion themselves.
        for _ in 0..4 {
            frames.push(solid(118));
        }

        let driver = Box::new(MockCaptureDriver::new(frames, 4, 4));
        let hub = Arc::new(StreamingHub::new());
        let dir = tempfile::tempdir().unwrap();
        let metadata = Arc::new(MetadataStore::new(dir.path()));
        let flags = PipelineFlags::new();
        let handle = ThreadHandle::new();

        let cfg = CameraConfig {
            device_id: 2,
            pre_capture: 4,
            post_capture: 4,
            event_gap: 2,
            minimum_motion_frames: 3,
            emulate_motion: false,
            ..camera_cfg()
        };
        let motion_cfg = MotionConfig {
            threshold: 1,
            threshold_maximum: 0,
            minimum_motion_frames: 3,
            event_gap_secs: 2,
            emulate_motion: false,
            ..MotionConfig::default()
        };

        let mut pipeline = CameraPipeline::new(cfg, motion_cfg, driver, hub, metadata, flags, handle);
        pipeline.driver.start(&pipeline.capture_params()).unwrap();

        for _ in 0..14 {
            if let Ok(CaptureOutcome::Ok { data, format, width, height }) = pipeline.driver.next_frame() {
                pipeline.process_one(data, format, width, height);
            }
        }
        assert!(pipeline.event.is_some(), "event must still be open right after the motion run");

        std::thread::sleep(Duration::from_millis(2_100));

        for i in 0..4 {
            if let Ok(CaptureOutcome::Ok { data, format, width, height }) = pipeline.driver.next_frame() {
                pipeline.process_one(data, format, width, height);
            }
            if i < 3 {
                assert!(pipeline.event.is_some(), "post-capture frame {i} must not close the event early");
            }
        }
        assert!(pipeline.event.is_none(), "event must close once post_capture is exhausted");
        assert_eq!(pipeline.last_event_frame_count, 18);
    }
}
