//! Session manager
//!
//! Serializes every acquisition and release of the capture session against
//! hot-plug notifications, user toggles and surface lifecycle events. All
//! transitions happen under one session lock. Per-device controls only hold
//! it long enough to clone the active [`AudioDevice`].

use super::acquisition::Acquisition;
use crate::audio::{AudioDevice, AudioPipeline, ChannelMapping};
use crate::video::{PreviewSettings, VideoDevice};
use common::{
    DeviceSelector, DisconnectTracker, EventNotifier, HotplugEvent, NativeDriver, SessionEvent,
    SharedSink, StreamSnapshot, SurfaceRef,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::{
    AudioCapabilities, CaptureError, DeviceIdentity, PreviewSize, Result, SessionState,
    TeardownReason, ToggleOutcome,
};

/// Session behaviour switches
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub preview: PreviewSettings,
    pub video_enabled: bool,
    /// Hex-dump captured frames at trace level
    pub diagnostics: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            preview: PreviewSettings::default(),
            video_enabled: true,
            diagnostics: false,
        }
    }
}

#[derive(Default)]
struct Session {
    state: SessionState,
    identity: Option<DeviceIdentity>,
    audio: Option<Arc<AudioDevice>>,
    video: Option<VideoDevice>,
    /// Render target handed over by the windowing system
    surface: Option<SurfaceRef>,
}

/// Owner of the active capture session
pub struct SessionManager {
    driver: Arc<dyn NativeDriver>,
    sink: SharedSink,
    notifier: EventNotifier,
    departures: DisconnectTracker,
    settings: SessionSettings,
    session: Mutex<Session>,
}

impl SessionManager {
    pub fn new(
        driver: Arc<dyn NativeDriver>,
        sink: SharedSink,
        notifier: EventNotifier,
        departures: DisconnectTracker,
        settings: SessionSettings,
    ) -> Self {
        Self {
            driver,
            sink,
            notifier,
            departures,
            settings,
            session: Mutex::new(Session::default()),
        }
    }

    /// Dispatch a hot-plug notification
    pub fn handle_hotplug(&self, event: HotplugEvent) {
        match event {
            HotplugEvent::Attached(identity) => self.on_attach(&identity),
            HotplugEvent::Connected(identity) => {
                self.on_connect(&identity);
            }
            HotplugEvent::Disconnected(identity) => {
                self.on_disconnect(&identity);
            }
            HotplugEvent::Detached(identity) => self.on_detach(&identity),
        }
    }

    pub fn on_attach(&self, identity: &DeviceIdentity) {
        info!("Device attached: {}", identity);
        self.notifier.notify(SessionEvent::DeviceAttached {
            identity: identity.clone(),
        });
    }

    pub fn on_detach(&self, identity: &DeviceIdentity) {
        info!("Device detached: {}", identity);
        self.notifier.notify(SessionEvent::DeviceDetached {
            identity: identity.clone(),
        });
    }

    /// Acquire a session on a newly accessible device
    ///
    /// An active session is torn down first. Returns whether the session is
    /// now active on `identity`.
    pub fn on_connect(&self, identity: &DeviceIdentity) -> bool {
        let mut session = self.session.lock();

        if let Some(active) = session.identity.as_ref() {
            info!("Replacing session on {} with {}", active, identity);
            self.teardown_locked(&mut session, TeardownReason::Replaced, false);
        }

        match self.acquire_locked(&mut session, identity) {
            Ok(()) => true,
            Err(e) => {
                self.fail_locked(&mut session, identity, &e);
                false
            }
        }
    }

    /// Release the session if `identity` is its device
    ///
    /// Returns false for a stale notification about any other device.
    pub fn on_disconnect(&self, identity: &DeviceIdentity) -> bool {
        let mut session = self.session.lock();
        self.departures.clear(identity);

        let is_active = session
            .identity
            .as_ref()
            .is_some_and(|active| active.same_device(identity));

        if !is_active {
            debug!("Ignoring stale disconnect for {}", identity);
            self.notifier.notify(SessionEvent::StaleNotification {
                identity: identity.clone(),
            });
            return false;
        }

        self.teardown_locked(&mut session, TeardownReason::Disconnected, false);
        // The surface belonged to the departed device's preview
        session.surface = None;
        true
    }

    /// Stop the active session, or start one on the selected device
    pub fn user_toggle(&self, selector: &dyn DeviceSelector) -> ToggleOutcome {
        let mut session = self.session.lock();

        if session.identity.is_some() {
            self.teardown_locked(&mut session, TeardownReason::UserStopped, true);
            return ToggleOutcome::Stopped;
        }

        let candidates = match self.driver.enumerate() {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                return ToggleOutcome::Failed(e.to_string());
            }
        };

        let Some(identity) = selector.select(&candidates) else {
            info!("No device selected ({} candidates)", candidates.len());
            return ToggleOutcome::NoDevice;
        };

        match self.acquire_locked(&mut session, &identity) {
            Ok(()) => ToggleOutcome::Started(identity),
            Err(e) => {
                self.fail_locked(&mut session, &identity, &e);
                ToggleOutcome::Failed(e.to_string())
            }
        }
    }

    /// Tear down any session and stop playback
    pub fn shutdown(&self) {
        let mut session = self.session.lock();
        self.teardown_locked(&mut session, TeardownReason::Shutdown, true);
    }

    pub fn on_surface_created(&self, surface: SurfaceRef) {
        debug!("Surface {} created", surface.id());
        self.session.lock().surface = Some(surface);
    }

    /// Bind the surface and start preview if a video endpoint is waiting
    ///
    /// Zero-sized surfaces are ignored. Returns whether preview is running.
    pub fn on_surface_changed(&self, surface: SurfaceRef, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            debug!("Ignoring zero-sized surface {}", surface.id());
            return false;
        }

        let mut session = self.session.lock();
        let session = &mut *session;
        session.surface = Some(surface.clone());

        let Some(video) = session.video.as_mut() else {
            return false;
        };
        if video.is_previewing() {
            return true;
        }

        if let Err(e) = video.set_preview_display(Some(surface)) {
            warn!("Failed to bind preview surface: {}", e);
            return false;
        }
        match video.start_preview() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to start preview: {}", e);
                false
            }
        }
    }

    /// Stop preview and drop every reference to the surface
    pub fn on_surface_destroyed(&self) {
        let mut session = self.session.lock();

        if let Some(video) = session.video.as_mut() {
            video.stop_preview();
            if let Err(e) = video.set_preview_display(None) {
                warn!("Failed to release preview surface: {}", e);
            }
        }
        if let Some(surface) = session.surface.take() {
            debug!("Surface {} destroyed", surface.id());
        }
    }

    /// Audio device of the active session
    pub fn audio(&self) -> Option<Arc<AudioDevice>> {
        self.session.lock().audio.clone()
    }

    fn active_audio(&self) -> Result<Arc<AudioDevice>> {
        self.audio().ok_or(CaptureError::DeviceUnavailable)
    }

    pub fn set_volume(&self, volume: i32) -> Result<i32> {
        self.active_audio()?.set_volume(volume)
    }

    pub fn set_mute(&self, mute: bool) -> Result<()> {
        self.active_audio()?.set_mute(mute)
    }

    pub fn set_sample_rate(&self, rate: u32) -> Result<()> {
        self.active_audio()?.set_sample_rate(rate)
    }

    pub fn volume(&self) -> Result<i32> {
        self.active_audio()?.volume()
    }

    pub fn is_mute(&self) -> Result<bool> {
        self.active_audio()?.is_mute()
    }

    pub fn sample_rate(&self) -> Result<u32> {
        self.active_audio()?.sample_rate()
    }

    pub fn audio_capabilities(&self) -> Option<AudioCapabilities> {
        self.active_audio().ok().map(|audio| audio.capabilities())
    }

    pub fn state(&self) -> SessionState {
        self.session.lock().state
    }

    pub fn active_identity(&self) -> Option<DeviceIdentity> {
        self.session.lock().identity.clone()
    }

    pub fn is_previewing(&self) -> bool {
        self.session
            .lock()
            .video
            .as_ref()
            .is_some_and(|video| video.is_previewing())
    }

    pub fn preview_size(&self) -> Option<PreviewSize> {
        self.session
            .lock()
            .video
            .as_ref()
            .and_then(|video| video.preview_size())
    }

    /// Stream counters of the active audio device
    pub fn metrics(&self) -> Option<StreamSnapshot> {
        self.active_audio()
            .ok()
            .map(|audio| audio.metrics().snapshot())
    }

    fn check_cancelled(&self, identity: &DeviceIdentity) -> Result<()> {
        if self.departures.has_departed(identity) {
            info!("{} disconnected during acquisition", identity);
            Err(CaptureError::AcquisitionCancelled)
        } else {
            Ok(())
        }
    }

    fn acquire_locked(&self, session: &mut Session, identity: &DeviceIdentity) -> Result<()> {
        session.state = SessionState::Acquiring;
        info!("Acquiring session on {}", identity);
        self.check_cancelled(identity)?;

        let mut acquisition = Acquisition::new(identity.clone(), self.sink.clone());

        let audio = AudioDevice::construct(self.driver.as_ref(), identity);
        self.check_cancelled(identity)?;

        if audio.is_valid() {
            let audio = Arc::new(audio);
            acquisition.set_audio(audio.clone());

            audio.open()?;
            self.check_cancelled(identity)?;

            let caps = audio.capabilities();
            let sink_config = self.sink.lock().config();
            if caps.sample_rate != sink_config.sample_rate {
                warn!(
                    "Device rate {} Hz differs from output rate {} Hz",
                    caps.sample_rate, sink_config.sample_rate
                );
            }

            let mapping = ChannelMapping::for_channels(caps.channel_count, sink_config.channels);
            let pipeline = AudioPipeline::new(self.sink.clone(), mapping, audio.metrics())
                .with_diagnostics(self.settings.diagnostics);
            debug!("Audio mapping for {}: {:?}", identity, mapping);

            audio.set_streaming_callback(pipeline.into_handler())?;
            audio.start_streaming()?;
            acquisition.start_sink()?;
            self.check_cancelled(identity)?;
        } else {
            debug!("No usable audio endpoint on {}", identity);
        }

        if self.settings.video_enabled
            && let Some(video) = VideoDevice::probe(self.driver.as_ref(), identity)
        {
            match self.prepare_video(video, session.surface.clone()) {
                Ok(video) => acquisition.set_video(video),
                Err(e) => warn!("Video unavailable on {}, continuing audio-only: {}", identity, e),
            }
            self.check_cancelled(identity)?;
        }

        if !acquisition.has_audio() && !acquisition.has_video() {
            return Err(CaptureError::DeviceUnavailable);
        }

        let (audio, video) = acquisition.commit();
        let audio_caps = audio.as_ref().map(|a| a.capabilities());
        let preview = video.as_ref().and_then(|v| v.preview_size());

        session.identity = Some(identity.clone());
        session.audio = audio;
        session.video = video;
        session.state = SessionState::Active;

        info!("Session active on {}", identity);
        self.notifier.notify(SessionEvent::SessionActive {
            identity: identity.clone(),
            audio: audio_caps,
            preview,
        });
        Ok(())
    }

    /// Open the video endpoint and negotiate preview; dropping the device
    /// on error destroys it
    fn prepare_video(
        &self,
        mut video: VideoDevice,
        surface: Option<SurfaceRef>,
    ) -> Result<VideoDevice> {
        video.open()?;
        video.negotiate(&self.settings.preview)?;

        if let Some(surface) = surface {
            video.set_preview_display(Some(surface))?;
            if let Err(e) = video.start_preview() {
                warn!("Preview did not start: {}", e);
            }
        }
        Ok(video)
    }

    fn fail_locked(&self, session: &mut Session, identity: &DeviceIdentity, error: &CaptureError) {
        warn!("Acquisition of {} failed: {}", identity, error);
        session.state = SessionState::Idle;
        self.notifier.notify(SessionEvent::AcquisitionFailed {
            identity: identity.clone(),
            reason: error.to_string(),
        });
    }

    fn teardown_locked(&self, session: &mut Session, reason: TeardownReason, stop_sink: bool) {
        let Some(identity) = session.identity.take() else {
            return;
        };
        session.state = SessionState::TearingDown;

        if let Some(audio) = session.audio.take() {
            if let Err(e) = audio.stop_streaming() {
                warn!("Failed to stop streaming on {}: {}", identity, e);
            }
            audio.close();
        }

        if let Some(mut video) = session.video.take() {
            video.stop_preview();
            video.destroy();
        }

        if stop_sink && let Err(e) = self.sink.lock().stop() {
            warn!("Failed to stop playback: {}", e);
        }

        session.state = SessionState::Idle;
        info!("Session on {} ended: {}", identity, reason);
        self.notifier.notify(SessionEvent::SessionIdle { identity, reason });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let session = self.session.get_mut();
        if session.identity.is_some() {
            let mut session = std::mem::take(session);
            self.teardown_locked(&mut session, TeardownReason::Shutdown, true);
        }
    }
}
