//! Action Dispatch (C8, §4.8): external command tokens to pipeline state
//! changes, gated by a per-action enable map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionToken {
    EventStart,
    EventEnd,
    Snapshot,
    Pause,
    Unpause,
    Restart,
    Stop,
    CameraAdd,
    CameraDelete,
    ConfigWrite,
    Config,
    ActionUser,
    PanLeft,
    PanRight,
    TiltUp,
    TiltDown,
    ZoomIn,
    ZoomOut,
}

impl ActionToken {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eventstart" => ActionToken::EventStart,
            "eventend" => ActionToken::EventEnd,
            "snapshot" => ActionToken::Snapshot,
            "pause" => ActionToken::Pause,
            "unpause" => ActionToken::Unpause,
            "restart" => ActionToken::Restart,
            "stop" => ActionToken::Stop,
            "camera_add" => ActionToken::CameraAdd,
            "camera_delete" => ActionToken::CameraDelete,
            "config_write" => ActionToken::ConfigWrite,
            "config" => ActionToken::Config,
            "action_user" => ActionToken::ActionUser,
            "pan_left" => ActionToken::PanLeft,
            "pan_right" => ActionToken::PanRight,
            "tilt_up" => ActionToken::TiltUp,
            "tilt_down" => ActionToken::TiltDown,
            "zoom_in" => ActionToken::ZoomIn,
            "zoom_out" => ActionToken::ZoomOut,
            _ => return None,
        })
    }
}

/// Atomic flags a Camera Pipeline exposes for `ActionDispatch` to set
/// (§4.5 "Key contracts").
#[derive(Default)]
pub struct PipelineFlags {
    pub restart: AtomicBool,
    pub pause: AtomicBool,
    pub event_stop: AtomicBool,
    pub event_user: AtomicBool,
    pub action_snapshot: AtomicBool,
    pub finish: AtomicBool,
}

impl PipelineFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(PipelineFlags::default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unknown action token")]
    Unknown,
    #[error("action '{0:?}' is disabled by the enable-map")]
    Disabled(ActionToken),
    #[error("unknown device id {0}")]
    UnknownDevice(u32),
}

/// Dispatches tokens to one camera (`device_id != 0`) or broadcast
/// (`device_id == 0`), gated by `enable_map` (§4.8).
pub struct ActionDispatch {
    pub enable_map: HashMap<ActionToken, bool>,
    pipelines: HashMap<u32, Arc<PipelineFlags>>,
}

impl ActionDispatch {
    pub fn new() -> Self {
        ActionDispatch {
            enable_map: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn register(&mut self, device_id: u32, flags: Arc<PipelineFlags>) {
        self.pipelines.insert(device_id, flags);
    }

    pub fn set_enabled(&mut self, token: ActionToken, enabled: bool) {
        self.enable_map.insert(token, enabled);
    }

    fn is_enabled(&self, token: ActionToken) -> bool {
        *self.enable_map.get(&token).unwrap_or(&true)
    }

    pub fn dispatch(&self, token: ActionToken, device_id: u32) -> Result<(), ActionError> {
        if !self.is_enabled(token) {
            return Err(ActionError::Disabled(token));
        }
        let targets: Vec<&Arc<PipelineFlags>> = if device_id == 0 {
            self.pipelines.values().collect()
        } else {
            vec![self
                .pipelines
                .get(&device_id)
                .ok_or(ActionError::UnknownDevice(device_id))?]
        };
        for flags in targets {
            match token {
                ActionToken::Restart => flags.restart.store(true, Ordering::SeqCst),
                ActionToken::Pause => flags.pause.store(true, Ordering::SeqCst),
                ActionToken::Unpause => flags.pause.store(false, Ordering::SeqCst),
                ActionToken::EventEnd => flags.event_stop.store(true, Ordering::SeqCst),
                ActionToken::EventStart | ActionToken::ActionUser => {
                    flags.event_user.store(true, Ordering::SeqCst)
                }
                ActionToken::Snapshot => flags.action_snapshot.store(true, Ordering::SeqCst),
                ActionToken::Stop => flags.finish.store(true, Ordering::SeqCst),
                // PTZ tokens and config/camera-list tokens are handled by
                // their own narrow collaborators (ptz::PtzController, the
                // camera list, Config Store) rather than a pipeline flag.
                ActionToken::PanLeft
                | ActionToken::PanRight
                | ActionToken::TiltUp
                | ActionToken::TiltDown
                | ActionToken::ZoomIn
                | ActionToken::ZoomOut
                | ActionToken::CameraAdd
                | ActionToken::CameraDelete
                | ActionToken::ConfigWrite
                | ActionToken::Config => {}
            }
        }
        Ok(())
    }
}

impl Default for ActionDispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_action_is_refused() {
        let mut dispatch = ActionDispatch::new();
        let flags = PipelineFlags::new();
        dispatch.register(1, flags.clone());
        dispatch.set_enabled(ActionToken::Stop, false);
        let err = dispatch.dispatch(ActionToken::Stop, 1).unwrap_err();
        assert!(matches!(err, ActionError::Disabled(ActionToken::Stop)));
        assert!(!flags.finish.load(Ordering::SeqCst));
    }

    #[test]
    fn broadcast_sets_flag_on_every_camera() {
        let mut dispatch = ActionDispatch::new();
        let f1 = PipelineFlags::new();
        let f2 = PipelineFlags::new();
        dispatch.register(1, f1.clone());
        dispatch.register(2, f2.clone());
        dispatch.dispatch(ActionToken::Pause, 0).unwrap();
        assert!(f1.pause.load(Ordering::SeqCst));
        assert!(f2.pause.load(Ordering::SeqCst));
    }

    #[test]
    fn parse_rejects_unknown_token() {
        assert!(ActionToken::parse("not_a_token").is_none());
        assert_eq!(ActionToken::parse("snapshot"), Some(ActionToken::Snapshot));
    }
}
