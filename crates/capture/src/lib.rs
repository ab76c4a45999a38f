//! usb-capture session core
//!
//! Coordinates hot-pluggable USB audio/video capture devices: hot-plug
//! notifications are turned into serialized session transitions, the audio
//! endpoint of the active device streams through a channel-mapping pipeline
//! into a playback sink, and the video endpoint renders into whatever display
//! surface the windowing system currently provides.
//!
//! The native side is reached only through the traits in [`common::driver`];
//! [`usb::RusbDriver`] and [`usb::UsbMonitor`] implement them on top of rusb.

pub mod audio;
pub mod config;
pub mod session;
pub mod usb;
pub mod video;

pub use audio::{AudioDevice, AudioPipeline, ChannelMapping, StreamGate};
pub use config::CaptureConfig;
pub use session::{SessionManager, SessionSettings, spawn_session_worker};
pub use video::{PreviewSettings, VideoDevice};
