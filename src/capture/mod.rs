//! Capture Driver (C2, §4.2): a trait over the capability set {start, stop,
//! next_frame, close} with three implementors selected by Cargo feature
//! (`cfg_if!`-gated) plus an always-available mock for tests.

use crate::error::CaptureError;
use crate::pixel::SourceFormat;
use std::time::Duration;

cfg_if::cfg_if! {
    if #[cfg(feature = "v4l2")] {
        pub mod v4l2;
    }
}
cfg_if::cfg_if! {
    if #[cfg(feature = "libcamera")] {
        pub mod libcamera;
    }
}
cfg_if::cfg_if! {
    if #[cfg(feature = "netcam")] {
        pub mod netcam;
    }
}
pub mod mock;

/// Parameters a driver negotiates against at `start` (§4.2): width/height
/// are rounded up to multiples of 8 before being handed to the device.
#[derive(Debug, Clone)]
pub struct CaptureParams {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub buffer_count: usize,
    /// Device control overrides, applied by numeric id or exact name.
    pub controls: Vec<(String, i64)>,
    /// NetCam-only: seconds without a frame before the connection is
    /// considered lost.
    pub device_tmo: Duration,
}

impl Default for CaptureParams {
    fn default() -> Self {
        CaptureParams {
            device: String::new(),
            width: 640,
            height: 480,
            framerate: 15,
            buffer_count: 4,
            controls: Vec::new(),
            device_tmo: Duration::from_secs(10),
        }
    }
}

pub enum CaptureOutcome {
    Ok { data: Vec<u8>, format: SourceFormat, width: u32, height: u32 },
    Retry,
}

/// The capability set every capture backend implements (§3 "Capability
/// Set / Variants").
pub trait CaptureDriver: Send {
    fn start(&mut self, params: &CaptureParams) -> Result<(), CaptureError>;
    fn next_frame(&mut self) -> Result<CaptureOutcome, CaptureError>;
    fn stop(&mut self) -> Result<(), CaptureError>;
}

/// Rounds a dimension up to the next multiple of 8, as §4.2 negotiation
/// requires.
pub fn round_up_8(v: u32) -> u32 {
    v.div_ceil(8) * 8
}

/// Widens an image to the next multiple of `stride` when bytes-per-line
/// exceeds `width` (§4.2 "honor stride").
pub fn widen_to_stride(width: u32, bytes_per_line: u32) -> u32 {
    if bytes_per_line > width {
        bytes_per_line
    } else {
        width
    }
}

/// Priority list for best-supported pixel format selection (§4.2): MJPEG
/// first, then YUV variants, then RGB, then Bayer.
pub const FORMAT_PRIORITY: &[SourceFormat] = &[
    SourceFormat::Mjpeg,
    SourceFormat::Yuv420Planar,
    SourceFormat::Yuv422Planar,
    SourceFormat::Yuyv,
    SourceFormat::Uyvy,
    SourceFormat::Rgb24,
    SourceFormat::Bgr24,
    SourceFormat::BayerBg,
    SourceFormat::BayerGb,
    SourceFormat::BayerGr,
    SourceFormat::BayerRg,
    SourceFormat::Y10,
    SourceFormat::Y12,
    SourceFormat::Grey,
    SourceFormat::Sn9c10x,
];

pub fn select_best_format(supported: &[SourceFormat]) -> Result<SourceFormat, CaptureError> {
    FORMAT_PRIORITY
        .iter()
        .copied()
        .find(|f| supported.contains(f))
        .ok_or(CaptureError::Format)
}

/// Reconnect backoff schedule (§4.2): 30s for the first 100 failures, 600s
/// for the next 100, then 7200s thereafter. Any successful `start` resets
/// the counter.
#[derive(Debug, Default)]
pub struct BackoffSchedule {
    failures: u32,
}

impl BackoffSchedule {
    pub fn record_failure(&mut self) -> Duration {
        self.failures += 1;
        self.delay_for(self.failures)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn delay_for(&self, failures: u32) -> Duration {
        if failures <= 100 {
            Duration::from_secs(30)
        } else if failures <= 200 {
            Duration::from_secs(600)
        } else {
            Duration::from_secs(7200)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_8_matches_resolution_negotiation() {
        assert_eq!(round_up_8(641), 648);
        assert_eq!(round_up_8(640), 640);
    }

    #[test]
    fn format_priority_prefers_mjpeg() {
        let supported = vec![SourceFormat::Rgb24, SourceFormat::Mjpeg, SourceFormat::Yuyv];
        assert_eq!(select_best_format(&supported).unwrap(), SourceFormat::Mjpeg);
    }

    #[test]
    fn backoff_schedule_follows_three_tiers() {
        let mut b = BackoffSchedule::default();
        for _ in 0..100 {
            assert_eq!(b.record_failure(), Duration::from_secs(30));
        }
        for _ in 0..100 {
            assert_eq!(b.record_failure(), Duration::from_secs(600));
        }
        assert_eq!(b.record_failure(), Duration::from_secs(7200));
        b.reset();
        assert_eq!(b.failures(), 0);
    }
}
