//! V4L2 capture backend built on the `v4l` crate.

use super::{round_up_8, widen_to_stride, CaptureDriver, CaptureOutcome, CaptureParams};
use crate::error::CaptureError;
use crate::pixel::SourceFormat;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

fn fourcc_to_format(fourcc: &FourCC) -> Option<SourceFormat> {
    match &fourcc.repr {
        b"YUYV" => Some(SourceFormat::Yuyv),
        b"UYVY" => Some(SourceFormat::Uyvy),
        b"MJPG" => Some(SourceFormat::Mjpeg),
        b"RGB3" => Some(SourceFormat::Rgb24),
        b"BGR3" => Some(SourceFormat::Bgr24),
        b"BA81" | b"BGGR" => Some(SourceFormat::BayerBg),
        b"GBRG" => Some(SourceFormat::BayerGb),
        b"GRBG" => Some(SourceFormat::BayerGr),
        b"RGGB" => Some(SourceFormat::BayerRg),
        b"Y10 " => Some(SourceFormat::Y10),
        b"Y12 " => Some(SourceFormat::Y12),
        b"GREY" => Some(SourceFormat::Grey),
        _ => None,
    }
}

pub struct V4l2Driver {
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    format: SourceFormat,
    width: u32,
    height: u32,
}

impl Default for V4l2Driver {
    fn default() -> Self {
        V4l2Driver {
            device: None,
            stream: None,
            format: SourceFormat::Yuyv,
            width: 0,
            height: 0,
        }
    }
}

impl CaptureDriver for V4l2Driver {
    fn start(&mut self, params: &CaptureParams) -> Result<(), CaptureError> {
        let dev = Device::with_path(&params.device)
            .map_err(|e| CaptureError::DeviceOpen(format!("{}: {e}", params.device)))?;

        let mut fmt = dev
            .format()
            .map_err(|e| CaptureError::DeviceOpen(e.to_string()))?;
        fmt.width = round_up_8(params.width);
        fmt.height = round_up_8(params.height);

        // Try each candidate fourcc in the same MJPEG-first priority order
        // as §4.2, falling back until the device accepts one.
        let candidates: &[&[u8; 4]] = &[b"MJPG", b"YUYV", b"UYVY", b"RGB3", b"BGGR", b"GREY"];
        let mut negotiated = None;
        for cc in candidates {
            fmt.fourcc = FourCC::new(*cc);
            if let Ok(accepted) = dev.set_format(&fmt) {
                if let Some(sf) = fourcc_to_format(&accepted.fourcc) {
                    negotiated = Some((accepted, sf));
                    break;
                }
            }
        }
        let (accepted, sf) = negotiated.ok_or(CaptureError::Format)?;

        if accepted.width % 8 != 0 || accepted.height % 8 != 0 {
            return Err(CaptureError::Resolution(accepted.width, accepted.height));
        }

        let width = widen_to_stride(accepted.width, accepted.bytesperline);
        self.format = sf;
        self.width = width;
        self.height = accepted.height;

        let mut stream = MmapStream::with_buffers(
            &dev,
            Type::VideoCapture,
            params.buffer_count.max(2) as u32,
        )
        .map_err(|e| CaptureError::DeviceOpen(e.to_string()))?;
        stream
            .start()
            .map_err(|e| CaptureError::DeviceOpen(e.to_string()))?;

        self.device = Some(dev);
        // SAFETY-equivalent lifetime erasure: the stream borrows `dev`,
        // which we keep alive for as long as `self` lives.
        self.stream = Some(unsafe { std::mem::transmute::<MmapStream<'_>, MmapStream<'static>>(stream) });
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CaptureOutcome, CaptureError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(CaptureError::Fatal("driver not started".into()));
        };
        let (buf, _meta) = stream
            .next()
            .map_err(|e| CaptureError::Fatal(e.to_string()))?;
        Ok(CaptureOutcome::Ok {
            data: buf.to_vec(),
            format: self.format,
            width: self.width,
            height: self.height,
        })
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.stream = None;
        self.device = None;
        Ok(())
    }
}
