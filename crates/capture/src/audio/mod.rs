//! UAC audio endpoint wrapper
//!
//! [`AudioDevice`] owns one native audio handle, caches its capabilities and
//! exposes the control and streaming operations the session needs. The
//! device lock orders control writes; the session lock is never taken here.
//!
//! Frames arrive on the native streaming thread. They pass through a
//! [`StreamGate`] that `close` shuts before touching the native handle, so a
//! frame racing a teardown is dropped instead of reaching a released sink.

pub mod pipeline;
pub mod sink;

pub use pipeline::{AudioPipeline, ChannelMapping, stereo_to_mono, stereo_to_mono_into};
pub use sink::{DiscardSink, build_sink};

use common::{FrameHandler, NativeAudio, NativeDriver, StreamMetrics};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use types::{
    AudioCapabilities, AudioDeviceState, CaptureError, DeviceIdentity, Result, parse_sample_rates,
};

/// Cancellation flag checked by the streaming callback on every frame
#[derive(Debug, Clone, Default)]
pub struct StreamGate(Arc<AtomicBool>);

impl StreamGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct AudioInner {
    native: Option<Box<dyn NativeAudio>>,
    state: AudioDeviceState,
    caps: AudioCapabilities,
    streaming: bool,
}

impl AudioInner {
    fn require_opened(&self, operation: &'static str) -> Result<()> {
        if self.state == AudioDeviceState::Opened {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn opened_native(&mut self, operation: &'static str) -> Result<&mut Box<dyn NativeAudio>> {
        self.require_opened(operation)?;
        self.native.as_mut().ok_or(CaptureError::DeviceUnavailable)
    }
}

/// Capability-negotiated wrapper around one UAC audio endpoint
pub struct AudioDevice {
    identity: DeviceIdentity,
    inner: Mutex<AudioInner>,
    gate: StreamGate,
    callback: Arc<Mutex<Option<FrameHandler>>>,
    metrics: Arc<StreamMetrics>,
}

impl AudioDevice {
    /// Resolve the audio endpoint of `identity` and query its capabilities
    ///
    /// Never fails: a device whose endpoint cannot be resolved or whose
    /// capability query fails is returned invalid, and `open` reports
    /// [`CaptureError::DeviceUnavailable`].
    pub fn construct(driver: &dyn NativeDriver, identity: &DeviceIdentity) -> Self {
        let mut native = driver.find_audio(identity);
        let mut caps = AudioCapabilities::default();

        if let Some(handle) = native.as_mut() {
            match handle.sample_rate() {
                Ok(rate) => {
                    caps.sample_rate = rate;
                    caps.supported_sample_rates = parse_sample_rates(&handle.supported_sample_rates());
                    caps.bit_resolution = handle.bit_resolution();
                    caps.channel_count = handle.channel_count();
                    caps.mute_available = handle.mute_available();
                    caps.volume_available = handle.volume_available();
                }
                Err(e) => {
                    warn!("Capability query failed for {}: {}", identity, e);
                    handle.close();
                    native = None;
                }
            }
        } else {
            debug!("No audio endpoint on {}", identity);
        }

        Self {
            identity: identity.clone(),
            inner: Mutex::new(AudioInner {
                native,
                state: AudioDeviceState::Constructed,
                caps,
                streaming: false,
            }),
            gate: StreamGate::new(),
            callback: Arc::new(Mutex::new(None)),
            metrics: Arc::new(StreamMetrics::new()),
        }
    }

    /// Whether the capability query resolved a usable endpoint
    pub fn is_valid(&self) -> bool {
        let inner = self.inner.lock();
        inner.native.is_some() && inner.state != AudioDeviceState::Closed
    }

    /// Open the native stream and snapshot mute/volume state
    ///
    /// A failed open releases the native handle; the device is then closed.
    pub fn open(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.state {
            AudioDeviceState::Opened => return Ok(()),
            AudioDeviceState::Closed => {
                return Err(CaptureError::InvalidState {
                    operation: "open",
                    state: AudioDeviceState::Closed,
                });
            }
            AudioDeviceState::Constructed => {}
        }

        let Some(native) = inner.native.as_mut() else {
            return Err(CaptureError::DeviceUnavailable);
        };

        if let Err(e) = native.open() {
            warn!("Failed to open audio on {}: {}", self.identity, e);
            native.close();
            inner.native = None;
            inner.state = AudioDeviceState::Closed;
            return Err(CaptureError::OpenFailed { code: e.code() });
        }

        let mut caps = inner.caps.clone();
        if caps.mute_available {
            match native.mute() {
                Ok(mute) => caps.mute = mute,
                Err(e) => debug!("Mute query failed: {}", e),
            }
        }
        if caps.volume_available {
            match native.volume() {
                Ok(volume) => caps.volume = volume,
                Err(e) => debug!("Volume query failed: {}", e),
            }
            match native.volume_range() {
                Ok((min, max)) => {
                    caps.min_volume = min;
                    caps.max_volume = max;
                }
                Err(e) => debug!("Volume range query failed: {}", e),
            }
        }

        inner.caps = caps;
        inner.state = AudioDeviceState::Opened;
        info!(
            "Opened audio on {}: {} Hz, {} ch, {} bit",
            self.identity, inner.caps.sample_rate, inner.caps.channel_count, inner.caps.bit_resolution
        );
        Ok(())
    }

    /// Release the native stream; later calls are no-ops
    pub fn close(&self) {
        self.gate.close();

        {
            let mut inner = self.inner.lock();
            if inner.state == AudioDeviceState::Closed {
                return;
            }

            if let Some(mut native) = inner.native.take() {
                if inner.streaming
                    && let Err(e) = native.stop_streaming()
                {
                    warn!("Failed to stop streaming on {}: {}", self.identity, e);
                }
                native.close();
            }
            inner.streaming = false;
            inner.state = AudioDeviceState::Closed;
        }

        self.callback.lock().take();
        self.metrics.mark_stopped();
        debug!("Closed audio on {}", self.identity);
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .opened_native("set sample rate")?
            .set_sample_rate(rate)
            .map_err(|e| CaptureError::ControlRejected {
                control: "sample rate",
                code: e.code(),
            })?;
        inner.caps.sample_rate = rate;
        debug!("Sample rate of {} set to {}", self.identity, rate);
        Ok(())
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .opened_native("set mute")?
            .set_mute(mute)
            .map_err(|e| CaptureError::ControlRejected {
                control: "mute",
                code: e.code(),
            })?;
        inner.caps.mute = mute;
        debug!("Mute of {} set to {}", self.identity, mute);
        Ok(())
    }

    /// Write the volume clamped into the device range, returning the value
    /// actually written
    pub fn set_volume(&self, volume: i32) -> Result<i32> {
        let mut inner = self.inner.lock();
        let clamped = inner.caps.clamp_volume(volume);
        inner
            .opened_native("set volume")?
            .set_volume(clamped)
            .map_err(|e| CaptureError::ControlRejected {
                control: "volume",
                code: e.code(),
            })?;
        inner.caps.volume = clamped;
        debug!("Volume of {} set to {}", self.identity, clamped);
        Ok(clamped)
    }

    pub fn sample_rate(&self) -> Result<u32> {
        let inner = self.inner.lock();
        inner.require_opened("get sample rate")?;
        Ok(inner.caps.sample_rate)
    }

    pub fn volume(&self) -> Result<i32> {
        let inner = self.inner.lock();
        inner.require_opened("get volume")?;
        Ok(inner.caps.volume)
    }

    pub fn is_mute(&self) -> Result<bool> {
        let inner = self.inner.lock();
        inner.require_opened("get mute")?;
        Ok(inner.caps.mute)
    }

    pub fn is_mute_available(&self) -> bool {
        self.inner.lock().caps.mute_available
    }

    pub fn is_volume_available(&self) -> bool {
        self.inner.lock().caps.volume_available
    }

    pub fn supported_sample_rates(&self) -> Vec<u32> {
        self.inner.lock().caps.supported_sample_rates.clone()
    }

    /// Capability snapshot, by value
    pub fn capabilities(&self) -> AudioCapabilities {
        self.inner.lock().caps.clone()
    }

    pub fn state(&self) -> AudioDeviceState {
        self.inner.lock().state
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().streaming
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        self.metrics.clone()
    }

    /// Register the single frame consumer, discarding any previous one
    pub fn set_streaming_callback(&self, callback: FrameHandler) -> Result<()> {
        let state = self.inner.lock().state;
        if state == AudioDeviceState::Closed {
            return Err(CaptureError::InvalidState {
                operation: "set streaming callback",
                state,
            });
        }

        if self.callback.lock().replace(callback).is_some() {
            debug!("Replaced streaming callback on {}", self.identity);
        }
        Ok(())
    }

    pub fn start_streaming(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.streaming {
            return Ok(());
        }

        let gate = self.gate.clone();
        let callback = self.callback.clone();
        let metrics = self.metrics.clone();
        let handler: FrameHandler = Box::new(move |frame| {
            if !gate.is_open() {
                metrics.record_dropped();
                return;
            }
            metrics.record_frame(frame.len());
            if let Some(consumer) = callback.lock().as_mut() {
                consumer(frame);
            }
        });

        let native = inner.opened_native("start streaming")?;
        self.gate.open();
        if let Err(e) = native.start_streaming(handler) {
            self.gate.close();
            return Err(e.into());
        }

        inner.streaming = true;
        self.metrics.mark_started();
        info!("Streaming started on {}", self.identity);
        Ok(())
    }

    /// Stop the native loop; returns after the last frame was delivered
    pub fn stop_streaming(&self) -> Result<()> {
        self.gate.close();

        let mut inner = self.inner.lock();
        if !inner.streaming {
            return Ok(());
        }

        let result = match inner.native.as_mut() {
            Some(native) => native.stop_streaming().map_err(CaptureError::from),
            None => Ok(()),
        };
        inner.streaming = false;
        self.metrics.mark_stopped();
        info!("Streaming stopped on {}", self.identity);
        result
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}
