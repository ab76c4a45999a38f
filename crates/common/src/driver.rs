//! Native collaborator interfaces
//!
//! The session core never talks to USB directly. Everything it needs from the
//! platform is expressed here: a driver that resolves identities to native
//! audio/video handles, the handles themselves, the display surface handed
//! over by the windowing system and the device picker used by the user toggle.
//!
//! Native handles are owned trait objects. Dropping one must release the
//! underlying resource, but owners are expected to call `close`/`destroy`
//! explicitly so failures can be logged.

use std::fmt;
use std::sync::Arc;
use types::{DeviceIdentity, DriverError, FrameFormat, PreviewSize};

/// Consumer of raw audio frames, invoked on the native streaming thread
pub type FrameHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Entry point into the native USB stack
pub trait NativeDriver: Send + Sync {
    /// Identities of devices currently attached and accessible
    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, DriverError>;

    /// Resolve the UAC audio endpoint of a device
    ///
    /// Returns `None` when the vendor/product/serial triple does not resolve
    /// to an audio endpoint.
    fn find_audio(&self, identity: &DeviceIdentity) -> Option<Box<dyn NativeAudio>>;

    /// Resolve the UVC video endpoint of a device
    fn find_video(&self, identity: &DeviceIdentity) -> Option<Box<dyn NativeVideo>>;
}

/// Native UAC audio streaming handle
pub trait NativeAudio: Send {
    fn open(&mut self) -> Result<(), DriverError>;

    /// Release the native stream. Must tolerate being called on a handle
    /// that was never opened.
    fn close(&mut self);

    fn sample_rate(&self) -> Result<u32, DriverError>;
    fn set_sample_rate(&mut self, rate: u32) -> Result<(), DriverError>;

    /// Comma-separated list of supported sampling frequencies
    fn supported_sample_rates(&self) -> String;

    fn bit_resolution(&self) -> u8;
    fn channel_count(&self) -> u8;
    fn mute_available(&self) -> bool;
    fn volume_available(&self) -> bool;

    fn mute(&self) -> Result<bool, DriverError>;
    fn set_mute(&mut self, mute: bool) -> Result<(), DriverError>;

    fn volume(&self) -> Result<i32, DriverError>;
    fn set_volume(&mut self, volume: i32) -> Result<(), DriverError>;

    /// `(min, max)` volume reported by the device
    fn volume_range(&self) -> Result<(i32, i32), DriverError>;

    /// Start the native streaming loop, delivering frames to `handler` on a
    /// thread owned by the driver
    fn start_streaming(&mut self, handler: FrameHandler) -> Result<(), DriverError>;

    /// Stop the native streaming loop
    ///
    /// Returns only after the last frame has been delivered; `handler` is
    /// dropped before this returns.
    fn stop_streaming(&mut self) -> Result<(), DriverError>;
}

/// Native UVC preview handle
pub trait NativeVideo: Send {
    fn open(&mut self) -> Result<(), DriverError>;
    fn supported_sizes(&self) -> Result<Vec<PreviewSize>, DriverError>;
    fn set_preview_size(
        &mut self,
        size: PreviewSize,
        format: FrameFormat,
    ) -> Result<(), DriverError>;
    /// Bind (or with `None`, release) the render target
    fn set_preview_display(&mut self, surface: Option<SurfaceRef>) -> Result<(), DriverError>;
    fn start_preview(&mut self) -> Result<(), DriverError>;
    fn stop_preview(&mut self);
    fn destroy(&mut self);
}

/// Opaque render target owned by the windowing system
pub trait DisplaySurface: Send + Sync + fmt::Debug {
    /// Stable identifier, used for logging and comparisons
    fn id(&self) -> u64;
}

pub type SurfaceRef = Arc<dyn DisplaySurface>;

/// Picks the device a user toggle should start a session on
pub trait DeviceSelector: Send + Sync {
    fn select(&self, candidates: &[DeviceIdentity]) -> Option<DeviceIdentity>;
}
