//! RTSP network camera backend built on `retina` (session setup, stream
//! loop, reconnect). `next_frame` blocks on network I/O; the Camera
//! Pipeline treats `device_tmo` seconds without a frame as a lost
//! connection (§4.2).

use super::{CaptureDriver, CaptureOutcome, CaptureParams};
use crate::error::CaptureError;
use crate::pixel::SourceFormat;
use futures::StreamExt;
use retina::client::{Credentials, Demuxed, Described, Session, SessionOptions, SetupOptions};
use retina::codec::CodecItem;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use url::Url;

pub struct NetCamDriver {
    runtime: Option<Runtime>,
    session: Option<Demuxed>,
    pending: VecDeque<Vec<u8>>,
    last_frame_at: Option<Instant>,
    device_tmo: Duration,
    width: u32,
    height: u32,
}

impl Default for NetCamDriver {
    fn default() -> Self {
        NetCamDriver {
            runtime: None,
            session: None,
            pending: VecDeque::new(),
            last_frame_at: None,
            device_tmo: Duration::from_secs(10),
            width: 0,
            height: 0,
        }
    }
}

impl NetCamDriver {
    async fn describe_and_setup(url: &str) -> anyhow::Result<(Session<Described>, usize)> {
        let session_group = std::sync::Arc::new(retina::client::SessionGroup::default());
        let mut session = Session::describe(
            Url::parse(url)?,
            SessionOptions::default()
                .creds(None::<Credentials>)
                .session_group(session_group)
                .teardown(retina::client::TeardownPolicy::Auto),
        )
        .await?;
        let video_i = session
            .streams()
            .iter()
            .position(|s| s.media() == "video" && (s.encoding_name() == "h264" || s.encoding_name() == "jpeg"))
            .ok_or_else(|| anyhow::anyhow!("no suitable video stream"))?;
        session
            .setup(video_i, SetupOptions::default().transport(retina::client::Transport::default()))
            .await?;
        Ok((session, video_i))
    }
}

impl CaptureDriver for NetCamDriver {
    fn start(&mut self, params: &CaptureParams) -> Result<(), CaptureError> {
        let rt = Runtime::new().map_err(|e| CaptureError::DeviceOpen(e.to_string()))?;
        let url = params.device.clone();
        let described = rt
            .block_on(Self::describe_and_setup(&url))
            .map_err(|e| CaptureError::DeviceOpen(e.to_string()))?;
        let (session, _video_i) = described;
        let demuxed = rt
            .block_on(session.play(retina::client::PlayOptions::default()))
            .map_err(|e| CaptureError::DeviceOpen(e.to_string()))?
            .demuxed()
            .map_err(|e| CaptureError::DeviceOpen(e.to_string()))?;

        self.width = params.width;
        self.height = params.height;
        self.device_tmo = params.device_tmo;
        self.runtime = Some(rt);
        self.session = Some(demuxed);
        self.last_frame_at = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<CaptureOutcome, CaptureError> {
        let Some(rt) = self.runtime.as_ref() else {
            return Err(CaptureError::Fatal("driver not started".into()));
        };
        let Some(demuxed) = self.session.as_mut() else {
            return Err(CaptureError::Fatal("driver not started".into()));
        };

        let elapsed = self.last_frame_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed > self.device_tmo {
            return Err(CaptureError::Timeout);
        }

        let item = rt.block_on(async {
            tokio::time::timeout(self.device_tmo, demuxed.next()).await
        });
        match item {
            Ok(Some(Ok(CodecItem::VideoFrame(f)))) => {
                self.last_frame_at = Some(Instant::now());
                self.pending.push_back(f.data().to_vec());
                Ok(CaptureOutcome::Ok {
                    data: self.pending.pop_front().unwrap_or_default(),
                    format: SourceFormat::Mjpeg,
                    width: self.width,
                    height: self.height,
                })
            }
            Ok(Some(Ok(_))) => Ok(CaptureOutcome::Retry),
            Ok(Some(Err(e))) => Err(CaptureError::Fatal(e.to_string())),
            Ok(None) => Err(CaptureError::Fatal("stream ended".into())),
            Err(_) => Err(CaptureError::Timeout),
        }
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.session = None;
        self.runtime = None;
        Ok(())
    }
}
