//! Config Store collaborator (§1, §10): a typed key/value snapshot with
//! per-camera overrides, loaded from TOML and reloadable via
//! `Config::on_change`.

use crate::error::ConfigError;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_target_dir")]
    pub target_dir: String,
    #[serde(default)]
    pub log_level: u8,
    #[serde(default)]
    pub webcontrol_port: u16,
    #[serde(default)]
    pub webcontrol_auth: AuthMode,
    #[serde(default)]
    pub webcontrol_user: String,
    #[serde(default)]
    pub webcontrol_password: String,
    #[serde(default = "default_lock_attempts")]
    pub webcontrol_lock_attempts: u32,
    #[serde(default = "default_lock_minutes")]
    pub webcontrol_lock_minutes: u32,
    #[serde(default = "default_stream_maxrate")]
    pub stream_maxrate: u32,
    #[serde(default = "default_stream_quality")]
    pub stream_quality: u8,
}

fn default_target_dir() -> String {
    "target".to_string()
}
fn default_lock_attempts() -> u32 {
    3
}
fn default_lock_minutes() -> u32 {
    10
}
fn default_stream_maxrate() -> u32 {
    10
}
fn default_stream_quality() -> u8 {
    70
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            target_dir: default_target_dir(),
            log_level: 6,
            webcontrol_port: 8080,
            webcontrol_auth: AuthMode::None,
            webcontrol_user: String::new(),
            webcontrol_password: String::new(),
            webcontrol_lock_attempts: default_lock_attempts(),
            webcontrol_lock_minutes: default_lock_minutes(),
            stream_maxrate: default_stream_maxrate(),
            stream_quality: default_stream_quality(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    None,
    Basic,
    Digest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub device_id: u32,
    pub name: String,
    pub device: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_pre_capture")]
    pub pre_capture: usize,
    #[serde(default = "default_post_capture")]
    pub post_capture: usize,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default)]
    pub threshold_maximum: u32,
    #[serde(default = "default_event_gap")]
    pub event_gap: i64,
    #[serde(default = "default_minimum_motion_frames")]
    pub minimum_motion_frames: u32,
    #[serde(default)]
    pub emulate_motion: bool,
    #[serde(default)]
    pub pause: bool,
    #[serde(default = "default_row")]
    pub mosaic_row: u32,
    #[serde(default = "default_col")]
    pub mosaic_col: u32,
    #[serde(default = "default_scale")]
    pub mosaic_scale: i32,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_framerate() -> u32 {
    15
}
fn default_pre_capture() -> usize {
    2
}
fn default_post_capture() -> usize {
    2
}
fn default_threshold() -> u32 {
    1500
}
fn default_event_gap() -> i64 {
    60
}
fn default_minimum_motion_frames() -> u32 {
    1
}
fn default_row() -> u32 {
    1
}
fn default_col() -> u32 {
    1
}
fn default_scale() -> i32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(rename = "camera", default)]
    pub cameras: Vec<CameraConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }

    pub fn camera_map(&self) -> HashMap<u32, CameraConfig> {
        self.cameras.iter().cloned().map(|c| (c.device_id, c)).collect()
    }

    /// Serializes and writes atomically: write-temp, rename (§10
    /// "config_write").
    pub fn write_atomic(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid("serialize".into(), e.to_string()))?;
        let tmp: PathBuf = path.with_extension("toml.tmp");
        std::fs::write(&tmp, text).map_err(|source| ConfigError::Read {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ConfigEvent {
    Reloaded,
}

/// Broadcasts `ConfigEvent::Reloaded` to all registered callbacks (§10
/// `Config::on_change`) over `crossbeam_channel`.
pub struct ConfigWatcher {
    senders: Vec<Sender<ConfigEvent>>,
}

impl ConfigWatcher {
    pub fn new() -> Self {
        ConfigWatcher { senders: Vec::new() }
    }

    pub fn on_change(&mut self) -> Receiver<ConfigEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.push(tx);
        rx
    }

    pub fn notify_reloaded(&self) {
        for s in &self.senders {
            let _ = s.send(ConfigEvent::Reloaded);
        }
    }
}

impl Default for ConfigWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml_text = r#"
            [general]
            target_dir = "/tmp/motionplus"

            [[camera]]
            device_id = 1
            name = "front door"
            device = "/dev/video0"
        "#;
        let cfg: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.general.target_dir, "/tmp/motionplus");
        assert_eq!(cfg.cameras.len(), 1);
        assert_eq!(cfg.cameras[0].width, 640);
    }

    #[test]
    fn on_change_receives_reload_notifications() {
        let mut watcher = ConfigWatcher::new();
        let rx = watcher.on_change();
        watcher.notify_reloaded();
        assert!(matches!(rx.try_recv().unwrap(), ConfigEvent::Reloaded));
    }
}
