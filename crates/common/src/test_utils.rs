//! Test utilities for usb-capture
//!
//! Provides fake collaborators (driver, audio/video handles, playback sink,
//! display surface, device selector) and helper functions for testing across
//! crates. Fakes record every call in shared state that outlives the handle,
//! so a test can inspect a native handle after the session core has dropped it.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{FakeAudioSpec, FakeDriver, create_mock_identity};
//! use common::NativeDriver;
//!
//! let driver = FakeDriver::new();
//! let identity = create_mock_identity(0x1234, 0x5678, "SN1");
//! driver.add_device(identity.clone(), Some(FakeAudioSpec::default()), None);
//!
//! assert!(driver.find_audio(&identity).is_some());
//! assert!(driver.find_video(&identity).is_none());
//! ```

use crate::driver::{
    DeviceSelector, DisplaySurface, FrameHandler, NativeAudio, NativeDriver, NativeVideo,
    SurfaceRef,
};
use crate::sink::{PlaybackSink, SinkConfig, SinkError, write_range};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use types::{
    ControlBlock, DEFAULT_USBFS_ROOT, DeviceIdentity, DriverError, FrameFormat, PreviewSize,
};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock identity on bus 1, address 4
pub fn create_mock_identity(vendor_id: u16, product_id: u16, serial: &str) -> DeviceIdentity {
    create_mock_identity_at(vendor_id, product_id, serial, 1, 4)
}

/// Create a mock identity at a specific bus/address
///
/// # Example
/// ```
/// use common::test_utils::create_mock_identity_at;
///
/// let identity = create_mock_identity_at(0x1234, 0x5678, "SN1", 2, 9);
/// assert_eq!(identity.device_path, "/dev/bus/usb/002/009");
/// assert_eq!(identity.usbfs_path, "/dev/bus/usb");
/// ```
pub fn create_mock_identity_at(
    vendor_id: u16,
    product_id: u16,
    serial: &str,
    bus_number: u8,
    device_address: u8,
) -> DeviceIdentity {
    let block = ControlBlock {
        vendor_id,
        product_id,
        serial: Some(serial.to_string()),
        bus_number,
        device_address,
        file_descriptor: Some(100 + device_address as i32),
        device_path: format!("/dev/bus/usb/{:03}/{:03}", bus_number, device_address),
    };
    DeviceIdentity::from_control_block(&block, DEFAULT_USBFS_ROOT)
}

/// Interleaved 16-bit stereo test frame: sample `i` is `i` on the left
/// channel and `!i` on the right
pub fn create_stereo_frame(pairs: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pairs * 4);
    for i in 0..pairs {
        let left = i as u16;
        frame.extend_from_slice(&left.to_le_bytes());
        frame.extend_from_slice(&(!left).to_le_bytes());
    }
    frame
}

/// Capabilities and behaviour of a fake audio endpoint
#[derive(Debug, Clone)]
pub struct FakeAudioSpec {
    pub sample_rate: u32,
    pub supported_rates: String,
    pub bit_resolution: u8,
    pub channel_count: u8,
    pub mute_available: bool,
    pub volume_available: bool,
    pub mute: bool,
    pub volume: i32,
    pub min_volume: i32,
    pub max_volume: i32,
    /// Non-zero makes `open` fail with this status
    pub open_status: i32,
    /// Make every control write fail
    pub reject_controls: bool,
    /// Make the sample rate query fail
    pub fail_capability_query: bool,
}

impl Default for FakeAudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            supported_rates: "44100,48000".to_string(),
            bit_resolution: 16,
            channel_count: 2,
            mute_available: true,
            volume_available: true,
            mute: false,
            volume: 50,
            min_volume: 0,
            max_volume: 100,
            open_status: 0,
            reject_controls: false,
            fail_capability_query: false,
        }
    }
}

/// Call record shared by every handle created for one fake audio endpoint
#[derive(Default)]
pub struct FakeAudioState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    stream_starts: AtomicUsize,
    stream_stops: AtomicUsize,
    open: AtomicBool,
    volume_writes: Mutex<Vec<i32>>,
    mute_writes: Mutex<Vec<bool>>,
    rate_writes: Mutex<Vec<u32>>,
    handler: Mutex<Option<FrameHandler>>,
}

impl FakeAudioState {
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn stream_starts(&self) -> usize {
        self.stream_starts.load(Ordering::SeqCst)
    }

    pub fn stream_stops(&self) -> usize {
        self.stream_stops.load(Ordering::SeqCst)
    }

    /// Whether the native stream is open right now
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn volume_writes(&self) -> Vec<i32> {
        self.volume_writes.lock().clone()
    }

    pub fn mute_writes(&self) -> Vec<bool> {
        self.mute_writes.lock().clone()
    }

    pub fn rate_writes(&self) -> Vec<u32> {
        self.rate_writes.lock().clone()
    }

    /// Deliver a frame as the native streaming loop would
    ///
    /// Returns false when no stream is running.
    pub fn push_frame(&self, frame: &[u8]) -> bool {
        match self.handler.lock().as_mut() {
            Some(handler) => {
                handler(frame);
                true
            }
            None => false,
        }
    }
}

type OpenHook = Arc<dyn Fn(&DeviceIdentity) + Send + Sync>;

/// Fake native audio handle
pub struct FakeAudio {
    identity: DeviceIdentity,
    spec: FakeAudioSpec,
    state: Arc<FakeAudioState>,
    open_hook: Option<OpenHook>,
    is_open: bool,
}

impl FakeAudio {
    fn check_control(&self) -> Result<(), DriverError> {
        if self.spec.reject_controls {
            Err(DriverError::Status(-9))
        } else if !self.is_open {
            Err(DriverError::NoDevice)
        } else {
            Ok(())
        }
    }
}

impl NativeAudio for FakeAudio {
    fn open(&mut self) -> Result<(), DriverError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.open_hook {
            hook(&self.identity);
        }
        if self.spec.open_status != 0 {
            return Err(DriverError::Status(self.spec.open_status));
        }
        self.is_open = true;
        self.state.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.is_open = false;
        self.state.open.store(false, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> Result<u32, DriverError> {
        if self.spec.fail_capability_query {
            return Err(DriverError::Status(-1));
        }
        Ok(self.spec.sample_rate)
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<(), DriverError> {
        self.check_control()?;
        self.state.rate_writes.lock().push(rate);
        self.spec.sample_rate = rate;
        Ok(())
    }

    fn supported_sample_rates(&self) -> String {
        self.spec.supported_rates.clone()
    }

    fn bit_resolution(&self) -> u8 {
        self.spec.bit_resolution
    }

    fn channel_count(&self) -> u8 {
        self.spec.channel_count
    }

    fn mute_available(&self) -> bool {
        self.spec.mute_available
    }

    fn volume_available(&self) -> bool {
        self.spec.volume_available
    }

    fn mute(&self) -> Result<bool, DriverError> {
        Ok(self.spec.mute)
    }

    fn set_mute(&mut self, mute: bool) -> Result<(), DriverError> {
        self.check_control()?;
        self.state.mute_writes.lock().push(mute);
        self.spec.mute = mute;
        Ok(())
    }

    fn volume(&self) -> Result<i32, DriverError> {
        Ok(self.spec.volume)
    }

    fn set_volume(&mut self, volume: i32) -> Result<(), DriverError> {
        self.check_control()?;
        self.state.volume_writes.lock().push(volume);
        self.spec.volume = volume;
        Ok(())
    }

    fn volume_range(&self) -> Result<(i32, i32), DriverError> {
        Ok((self.spec.min_volume, self.spec.max_volume))
    }

    fn start_streaming(&mut self, handler: FrameHandler) -> Result<(), DriverError> {
        if !self.is_open {
            return Err(DriverError::NoDevice);
        }
        self.state.stream_starts.fetch_add(1, Ordering::SeqCst);
        *self.state.handler.lock() = Some(handler);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), DriverError> {
        // Waits for an in-flight push_frame through the handler lock
        if self.state.handler.lock().take().is_some() {
            self.state.stream_stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Capabilities and behaviour of a fake video endpoint
#[derive(Debug, Clone)]
pub struct FakeVideoSpec {
    pub sizes: Vec<PreviewSize>,
    /// Formats `set_preview_size` accepts
    pub accepted_formats: Vec<FrameFormat>,
    /// Non-zero makes `open` fail with this status
    pub open_status: i32,
}

impl Default for FakeVideoSpec {
    fn default() -> Self {
        Self {
            sizes: vec![PreviewSize::new(640, 480), PreviewSize::new(1280, 720)],
            accepted_formats: vec![FrameFormat::Mjpeg, FrameFormat::Yuyv],
            open_status: 0,
        }
    }
}

/// Call record shared by every handle created for one fake video endpoint
#[derive(Default)]
pub struct FakeVideoState {
    opens: AtomicUsize,
    destroys: AtomicUsize,
    preview_starts: AtomicUsize,
    preview_stops: AtomicUsize,
    previewing: AtomicBool,
    surface: Mutex<Option<u64>>,
    preview_mode: Mutex<Option<(PreviewSize, FrameFormat)>>,
    size_requests: Mutex<Vec<(PreviewSize, FrameFormat)>>,
}

impl FakeVideoState {
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn preview_starts(&self) -> usize {
        self.preview_starts.load(Ordering::SeqCst)
    }

    pub fn preview_stops(&self) -> usize {
        self.preview_stops.load(Ordering::SeqCst)
    }

    pub fn is_previewing(&self) -> bool {
        self.previewing.load(Ordering::SeqCst)
    }

    /// Id of the bound surface
    pub fn bound_surface(&self) -> Option<u64> {
        *self.surface.lock()
    }

    pub fn preview_mode(&self) -> Option<(PreviewSize, FrameFormat)> {
        *self.preview_mode.lock()
    }

    pub fn size_requests(&self) -> Vec<(PreviewSize, FrameFormat)> {
        self.size_requests.lock().clone()
    }
}

/// Fake native video handle
pub struct FakeVideo {
    spec: FakeVideoSpec,
    state: Arc<FakeVideoState>,
    is_open: bool,
}

impl NativeVideo for FakeVideo {
    fn open(&mut self) -> Result<(), DriverError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if self.spec.open_status != 0 {
            return Err(DriverError::Status(self.spec.open_status));
        }
        self.is_open = true;
        Ok(())
    }

    fn supported_sizes(&self) -> Result<Vec<PreviewSize>, DriverError> {
        Ok(self.spec.sizes.clone())
    }

    fn set_preview_size(
        &mut self,
        size: PreviewSize,
        format: FrameFormat,
    ) -> Result<(), DriverError> {
        self.state.size_requests.lock().push((size, format));
        if !self.is_open {
            return Err(DriverError::NoDevice);
        }
        if !self.spec.sizes.contains(&size) || !self.spec.accepted_formats.contains(&format) {
            return Err(DriverError::Status(-51));
        }
        *self.state.preview_mode.lock() = Some((size, format));
        Ok(())
    }

    fn set_preview_display(&mut self, surface: Option<SurfaceRef>) -> Result<(), DriverError> {
        *self.state.surface.lock() = surface.map(|s| s.id());
        Ok(())
    }

    fn start_preview(&mut self) -> Result<(), DriverError> {
        if self.state.surface.lock().is_none() {
            return Err(DriverError::Status(-2));
        }
        self.state.preview_starts.fetch_add(1, Ordering::SeqCst);
        self.state.previewing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_preview(&mut self) {
        if self.state.previewing.swap(false, Ordering::SeqCst) {
            self.state.preview_stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn destroy(&mut self) {
        self.state.destroys.fetch_add(1, Ordering::SeqCst);
        self.state.previewing.store(false, Ordering::SeqCst);
        *self.state.surface.lock() = None;
        self.is_open = false;
    }
}

struct FakeDevice {
    identity: DeviceIdentity,
    audio: Option<(FakeAudioSpec, Arc<FakeAudioState>)>,
    video: Option<(FakeVideoSpec, Arc<FakeVideoState>)>,
}

/// In-memory native driver
#[derive(Default)]
pub struct FakeDriver {
    devices: Mutex<Vec<FakeDevice>>,
    open_hook: Mutex<Option<OpenHook>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device; replaces an existing device with the same identity
    pub fn add_device(
        &self,
        identity: DeviceIdentity,
        audio: Option<FakeAudioSpec>,
        video: Option<FakeVideoSpec>,
    ) {
        let mut devices = self.devices.lock();
        devices.retain(|d| !d.identity.same_device(&identity));
        devices.push(FakeDevice {
            identity,
            audio: audio.map(|spec| (spec, Arc::new(FakeAudioState::default()))),
            video: video.map(|spec| (spec, Arc::new(FakeVideoState::default()))),
        });
    }

    pub fn remove_device(&self, identity: &DeviceIdentity) {
        self.devices
            .lock()
            .retain(|d| !d.identity.same_device(identity));
    }

    pub fn audio_state(&self, identity: &DeviceIdentity) -> Option<Arc<FakeAudioState>> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.identity.same_device(identity))
            .and_then(|d| d.audio.as_ref().map(|(_, state)| state.clone()))
    }

    pub fn video_state(&self, identity: &DeviceIdentity) -> Option<Arc<FakeVideoState>> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.identity.same_device(identity))
            .and_then(|d| d.video.as_ref().map(|(_, state)| state.clone()))
    }

    /// Run `hook` inside every audio `open` call, before it completes
    pub fn set_open_hook(&self, hook: impl Fn(&DeviceIdentity) + Send + Sync + 'static) {
        *self.open_hook.lock() = Some(Arc::new(hook));
    }
}

impl NativeDriver for FakeDriver {
    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, DriverError> {
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|d| d.identity.clone())
            .collect())
    }

    fn find_audio(&self, identity: &DeviceIdentity) -> Option<Box<dyn NativeAudio>> {
        let devices = self.devices.lock();
        let device = devices.iter().find(|d| d.identity.same_device(identity))?;
        let (spec, state) = device.audio.as_ref()?;
        Some(Box::new(FakeAudio {
            identity: identity.clone(),
            spec: spec.clone(),
            state: state.clone(),
            open_hook: self.open_hook.lock().clone(),
            is_open: false,
        }))
    }

    fn find_video(&self, identity: &DeviceIdentity) -> Option<Box<dyn NativeVideo>> {
        let devices = self.devices.lock();
        let device = devices.iter().find(|d| d.identity.same_device(identity))?;
        let (spec, state) = device.video.as_ref()?;
        Some(Box::new(FakeVideo {
            spec: spec.clone(),
            state: state.clone(),
            is_open: false,
        }))
    }
}

/// Call record of a [`RecordingSink`]
#[derive(Debug, Default)]
pub struct SinkLog {
    plays: AtomicUsize,
    stops: AtomicUsize,
    writes: AtomicUsize,
    playing: AtomicBool,
    written: Mutex<Vec<u8>>,
}

impl SinkLog {
    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Every byte the sink accepted, in order
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }
}

/// Playback sink that records what it receives
pub struct RecordingSink {
    config: SinkConfig,
    log: Arc<SinkLog>,
    accept_limit: Option<usize>,
}

impl RecordingSink {
    pub fn new(config: SinkConfig) -> (Self, Arc<SinkLog>) {
        let log = Arc::new(SinkLog::default());
        (
            Self {
                config,
                log: log.clone(),
                accept_limit: None,
            },
            log,
        )
    }

    /// Accept at most `limit` bytes per write
    pub fn with_accept_limit(mut self, limit: usize) -> Self {
        self.accept_limit = Some(limit);
        self
    }
}

impl PlaybackSink for RecordingSink {
    fn config(&self) -> SinkConfig {
        self.config
    }

    fn play(&mut self) -> Result<(), SinkError> {
        self.log.plays.fetch_add(1, Ordering::SeqCst);
        self.log.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, buffer: &[u8], offset: usize, length: usize) -> Result<usize, SinkError> {
        let data = write_range(buffer, offset, length)?;
        let accepted = self.accept_limit.map_or(data.len(), |limit| data.len().min(limit));
        self.log.writes.fetch_add(1, Ordering::SeqCst);
        self.log
            .written
            .lock()
            .extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        self.log.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.log.is_playing()
    }
}

#[derive(Debug)]
pub struct FakeSurface {
    pub id: u64,
}

impl FakeSurface {
    pub fn new_ref(id: u64) -> SurfaceRef {
        Arc::new(Self { id })
    }
}

impl DisplaySurface for FakeSurface {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Selector that always answers with the same device
pub struct FixedSelector(pub Option<DeviceIdentity>);

impl DeviceSelector for FixedSelector {
    fn select(&self, _candidates: &[DeviceIdentity]) -> Option<DeviceIdentity> {
        self.0.clone()
    }
}

/// Timeout wrapper for async tests
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_identity() {
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");

        assert_eq!(identity.vendor_id, 0x1234);
        assert_eq!(identity.serial, "SN1");
        assert_eq!(identity.bus_number, 1);
        assert_eq!(identity.device_address, 4);
        assert_eq!(identity.usbfs_path, "/dev/bus/usb");
    }

    #[test]
    fn test_create_stereo_frame() {
        let frame = create_stereo_frame(2);
        assert_eq!(frame, vec![0x00, 0x00, 0xff, 0xff, 0x01, 0x00, 0xfe, 0xff]);
    }

    #[test]
    fn test_fake_audio_state_outlives_handle() {
        let driver = FakeDriver::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");
        driver.add_device(identity.clone(), Some(FakeAudioSpec::default()), None);

        let mut audio = driver.find_audio(&identity).unwrap();
        audio.open().unwrap();
        audio.set_volume(20).unwrap();
        audio.close();
        drop(audio);

        let state = driver.audio_state(&identity).unwrap();
        assert_eq!(state.open_count(), 1);
        assert_eq!(state.close_count(), 1);
        assert_eq!(state.volume_writes(), vec![20]);
        assert!(!state.is_open());
    }

    #[test]
    fn test_fake_audio_streaming() {
        let driver = FakeDriver::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");
        driver.add_device(identity.clone(), Some(FakeAudioSpec::default()), None);
        let state = driver.audio_state(&identity).unwrap();

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let mut audio = driver.find_audio(&identity).unwrap();
        audio.open().unwrap();
        audio
            .start_streaming(Box::new(move |frame| {
                counter.fetch_add(frame.len(), Ordering::SeqCst);
            }))
            .unwrap();

        assert!(state.push_frame(&[0u8; 8]));
        audio.stop_streaming().unwrap();
        assert!(!state.push_frame(&[0u8; 8]));
        assert_eq!(received.load(Ordering::SeqCst), 8);
        assert_eq!(state.stream_stops(), 1);
    }

    #[test]
    fn test_fake_video_rejects_unaccepted_format() {
        let driver = FakeDriver::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");
        let spec = FakeVideoSpec {
            accepted_formats: vec![FrameFormat::Yuyv],
            ..Default::default()
        };
        driver.add_device(identity.clone(), None, Some(spec));

        let mut video = driver.find_video(&identity).unwrap();
        video.open().unwrap();
        let size = PreviewSize::new(640, 480);
        assert!(video.set_preview_size(size, FrameFormat::Mjpeg).is_err());
        assert!(video.set_preview_size(size, FrameFormat::Yuyv).is_ok());
        assert!(video.start_preview().is_err());
    }

    #[test]
    fn test_recording_sink_accept_limit() {
        let (sink, log) = RecordingSink::new(SinkConfig::default());
        let mut sink = sink.with_accept_limit(3);

        assert_eq!(sink.write(&[1, 2, 3, 4, 5], 1, 4).unwrap(), 3);
        assert_eq!(log.written(), vec![2, 3, 4]);
        assert!(sink.write(&[1, 2], 1, 4).is_err());
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}
