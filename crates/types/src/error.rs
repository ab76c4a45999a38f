//! Error types for device control and streaming

use crate::state::AudioDeviceState;
use thiserror::Error;

/// Errors reported by the native USB driver collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Native call returned a non-zero status code
    #[error("native call failed with status {0}")]
    Status(i32),

    /// Device is gone or was never resolved
    #[error("no such device")]
    NoDevice,

    /// Operation is not provided by this backend
    #[error("not supported: {0}")]
    Unsupported(&'static str),

    /// Error from the USB stack
    #[error("USB error: {0}")]
    Usb(String),

    /// Control transfer did not complete in time
    #[error("timed out")]
    Timeout,
}

impl DriverError {
    /// Status code for reporting, following libusb conventions for the
    /// non-numeric variants
    pub fn code(&self) -> i32 {
        match self {
            DriverError::Status(code) => *code,
            DriverError::NoDevice => -4,
            DriverError::Timeout => -7,
            DriverError::Unsupported(_) => -12,
            DriverError::Usb(_) => -99,
        }
    }
}

/// Errors surfaced by the capture session core
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Capability query or handle construction failed
    #[error("device unavailable")]
    DeviceUnavailable,

    /// Native open returned a non-zero status
    #[error("device open failed with status {code}")]
    OpenFailed { code: i32 },

    /// Device rejected a control write; the cached value is unchanged
    #[error("{control} rejected by device (status {code})")]
    ControlRejected { control: &'static str, code: i32 },

    /// Playback sink accepted fewer bytes than offered
    #[error("short write: sink accepted {written} of {offered} bytes")]
    ShortWrite { offered: usize, written: usize },

    /// Notification for a device that is not the active session
    #[error("stale notification")]
    StaleNotification,

    /// Operation not valid in the current device state
    #[error("cannot {operation} while device is {state}")]
    InvalidState {
        operation: &'static str,
        state: AudioDeviceState,
    },

    /// The device disconnected while it was being acquired
    #[error("acquisition cancelled by disconnect")]
    AcquisitionCancelled,

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("playback sink error: {0}")]
    Sink(String),
}

/// Type alias for capture results
pub type Result<T> = std::result::Result<T, CaptureError>;
