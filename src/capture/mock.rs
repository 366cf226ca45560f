//! An in-memory capture driver that replays a canned frame sequence.
//! Used by the Camera Pipeline's own tests and by `tests/integration_test.rs`
//! to exercise the §8 event-lifecycle scenario without real hardware.

use super::{CaptureDriver, CaptureOutcome, CaptureParams};
use crate::error::CaptureError;
use crate::pixel::SourceFormat;

pub struct MockCaptureDriver {
    frames: Vec<Vec<u8>>,
    next: usize,
    width: u32,
    height: u32,
    started: bool,
}

impl MockCaptureDriver {
    pub fn new(frames: Vec<Vec<u8>>, width: u32, height: u32) -> Self {
        MockCaptureDriver { frames, next: 0, width, height, started: false }
    }
}

impl CaptureDriver for MockCaptureDriver {
    fn start(&mut self, _params: &CaptureParams) -> Result<(), CaptureError> {
        self.started = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CaptureOutcome, CaptureError> {
        if !self.started {
            return Err(CaptureError::Fatal("driver not started".into()));
        }
        if self.next >= self.frames.len() {
            return Ok(CaptureOutcome::Retry);
        }
        let data = self.frames[self.next].clone();
        self.next += 1;
        Ok(CaptureOutcome::Ok {
            data,
            format: SourceFormat::Yuv420Planar,
            width: self.width,
            height: self.height,
        })
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.started = false;
        Ok(())
    }
}
