//! Error kinds for the capture/convert/detect/stream stack (§7).
//!
//! Each component call returns its own `thiserror`-derived enum so the
//! Camera Pipeline's main loop can match on failure class (transient,
//! recoverable, fatal) without downcasting. `anyhow::Error` is reserved for
//! the outermost boundary (`main`, HTTP handlers).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture device: {0}")]
    DeviceOpen(String),
    #[error("no supported pixel format for device")]
    Format,
    #[error("negotiated resolution {0}x{1} is not a multiple of 8")]
    Resolution(u32, u32),
    #[error("capture timed out")]
    Timeout,
    #[error("capture source closed")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("frame geometry mismatch: reference is {0}x{1}, frame is {2}x{3}")]
    GeometryMismatch(u32, u32, u32, u32),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("jpeg encode failed: {0}")]
    Jpeg(String),
    #[error("muxer error: {0}")]
    Mux(String),
}

#[derive(Debug, Error)]
pub enum RingError {
    #[error("ring buffer full, no saved frame to reclaim")]
    Full,
    #[error("cannot resize ring while pipeline is not idle")]
    NotQuiescent,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {0}: {1}")]
    Invalid(String, String),
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request")]
    BadRequest,
    #[error("authentication required")]
    Unauthorized,
    #[error("unknown url component")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}
