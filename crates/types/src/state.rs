//! Lifecycle states for audio devices and capture sessions

use crate::identity::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one audio device wrapper
///
/// `Closed` is terminal: the native resource is released and no operation
/// moves the device out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioDeviceState {
    Constructed,
    Opened,
    Closed,
}

impl fmt::Display for AudioDeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioDeviceState::Constructed => write!(f, "constructed"),
            AudioDeviceState::Opened => write!(f, "opened"),
            AudioDeviceState::Closed => write!(f, "closed"),
        }
    }
}

/// State of the system-wide capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Acquiring,
    Active,
    TearingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Acquiring => write!(f, "acquiring"),
            SessionState::Active => write!(f, "active"),
            SessionState::TearingDown => write!(f, "tearing down"),
        }
    }
}

/// Why an active session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeardownReason {
    /// The session device was disconnected
    Disconnected,
    /// The user stopped the session
    UserStopped,
    /// A different device connected and took over
    Replaced,
    /// The process is shutting down
    Shutdown,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownReason::Disconnected => write!(f, "device disconnected"),
            TeardownReason::UserStopped => write!(f, "stopped by user"),
            TeardownReason::Replaced => write!(f, "replaced by another device"),
            TeardownReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Result of a user-initiated start/stop toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// A session was started on this device
    Started(DeviceIdentity),
    /// The active session was stopped
    Stopped,
    /// No session was active and no device was selected
    NoDevice,
    /// Acquisition failed; the session is idle
    Failed(String),
}

impl fmt::Display for ToggleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToggleOutcome::Started(identity) => write!(f, "session started on {}", identity),
            ToggleOutcome::Stopped => write!(f, "session stopped"),
            ToggleOutcome::NoDevice => write!(f, "no device selected"),
            ToggleOutcome::Failed(reason) => write!(f, "device open failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_default_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::TearingDown.to_string(), "tearing down");
        assert_eq!(AudioDeviceState::Opened.to_string(), "opened");
        assert_eq!(
            ToggleOutcome::Failed("busy".to_string()).to_string(),
            "device open failed: busy"
        );
    }
}
