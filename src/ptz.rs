//! PTZ command template execution (§4.8 pan/tilt/zoom action tokens), via
//! `Command::new("sh").arg("-c").arg(cmd).status()` for short-lived
//! one-shot commands.

use crate::action::ActionToken;
use std::collections::HashMap;
use std::process::{Command, Stdio};

#[derive(Debug, thiserror::Error)]
pub enum PtzError {
    #[error("no command template configured for this action on this camera")]
    NotConfigured,
    #[error("failed to spawn ptz command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ptz command exited with status {0}")]
    NonZeroExit(i32),
}

/// Per-camera command templates, one shell command string per supported
/// PTZ token (§10 `ptz_pan_left`/`ptz_pan_right`/`ptz_tilt_up`/
/// `ptz_tilt_down`/`ptz_zoom_in`/`ptz_zoom_out`).
#[derive(Debug, Clone, Default)]
pub struct PtzCommands {
    templates: HashMap<ActionToken, String>,
}

impl PtzCommands {
    pub fn new() -> Self {
        PtzCommands::default()
    }

    pub fn set(&mut self, token: ActionToken, command: impl Into<String>) {
        self.templates.insert(token, command.into());
    }

    pub fn get(&self, token: ActionToken) -> Option<&str> {
        self.templates.get(&token).map(String::as_str)
    }
}

/// Runs the shell command template for `token` on `commands`, blocking
/// until it exits (§4.8: PTZ dispatch is synchronous from the caller's
/// point of view, the way `config_write`/`restart` are).
pub fn run(commands: &PtzCommands, token: ActionToken) -> Result<(), PtzError> {
    let template = commands.get(token).ok_or(PtzError::NotConfigured)?;
    let status = Command::new("sh")
        .arg("-c")
        .arg(template)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    match status.code() {
        Some(0) | None => Ok(()),
        Some(code) => Err(PtzError::NonZeroExit(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_template_is_not_configured() {
        let commands = PtzCommands::new();
        let err = run(&commands, ActionToken::PanLeft).unwrap_err();
        assert!(matches!(err, PtzError::NotConfigured));
    }

    #[test]
    fn configured_command_runs_successfully() {
        let mut commands = PtzCommands::new();
        commands.set(ActionToken::PanLeft, "true");
        run(&commands, ActionToken::PanLeft).unwrap();
    }

    #[test]
    fn nonzero_exit_is_reported() {
        let mut commands = PtzCommands::new();
        commands.set(ActionToken::PanRight, "exit 7");
        let err = run(&commands, ActionToken::PanRight).unwrap_err();
        assert!(matches!(err, PtzError::NonZeroExit(7)));
    }
}
