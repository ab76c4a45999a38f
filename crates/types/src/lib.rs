//! Shared data model for usb-capture
//!
//! This crate defines the types passed between the USB event thread, the
//! session worker and the audio streaming path: device identities captured from
//! hot-plug control blocks, negotiated audio capabilities, video preview
//! parameters, lifecycle states and the error taxonomy.
//!
//! # Example
//!
//! ```
//! use types::{ControlBlock, DeviceIdentity, DEFAULT_USBFS_ROOT};
//!
//! let block = ControlBlock {
//!     vendor_id: 0x1234,
//!     product_id: 0x5678,
//!     serial: Some("SN1".to_string()),
//!     bus_number: 1,
//!     device_address: 4,
//!     file_descriptor: None,
//!     device_path: "/dev/bus/usb/001/004".to_string(),
//! };
//!
//! let identity = DeviceIdentity::from_control_block(&block, DEFAULT_USBFS_ROOT);
//! assert_eq!(identity.usbfs_path, "/dev/bus/usb");
//! ```

pub mod capabilities;
pub mod error;
pub mod identity;
pub mod state;

pub use capabilities::{
    AudioCapabilities, DEFAULT_MAX_VOLUME, FrameFormat, PreviewSize, parse_sample_rates,
};
pub use error::{CaptureError, DriverError, Result};
pub use identity::{ControlBlock, DEFAULT_USBFS_ROOT, DeviceIdentity, DeviceKey, usbfs_root};
pub use state::{AudioDeviceState, SessionState, TeardownReason, ToggleOutcome};
