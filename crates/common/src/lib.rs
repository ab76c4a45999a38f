//! Common utilities for usb-capture
//!
//! This crate provides the collaborator interfaces consumed by the session
//! core (native driver, playback sink, display surface, device selector), the
//! channel bridge between the USB event thread and the session worker,
//! disconnect tracking, stream metrics, logging setup and test fakes.

pub mod channel;
pub mod departures;
pub mod driver;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod sink;
pub mod test_utils;

pub use channel::{
    EventNotifier, HotplugEvent, HotplugSender, SessionBridge, SessionCommand, SessionEvent,
    SessionWorkerChannel, create_session_bridge, event_channel,
};
pub use departures::DisconnectTracker;
pub use driver::{
    DeviceSelector, DisplaySurface, FrameHandler, NativeAudio, NativeDriver, NativeVideo,
    SurfaceRef,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use metrics::{StreamMetrics, StreamSnapshot};
pub use sink::{PlaybackSink, SharedSink, SinkConfig, SinkError, shared_sink};
