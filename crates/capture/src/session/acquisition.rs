//! Scoped acquisition with rollback
//!
//! Every resource acquired while a session is being set up is parked in an
//! [`Acquisition`]. Dropping it without `commit` releases everything in
//! reverse order, so every early return leaves nothing open.

use crate::audio::AudioDevice;
use crate::video::VideoDevice;
use common::SharedSink;
use std::sync::Arc;
use tracing::{debug, warn};
use types::{CaptureError, DeviceIdentity, Result};

pub(crate) struct Acquisition {
    identity: DeviceIdentity,
    audio: Option<Arc<AudioDevice>>,
    video: Option<VideoDevice>,
    sink: SharedSink,
    sink_started: bool,
}

impl Acquisition {
    pub(crate) fn new(identity: DeviceIdentity, sink: SharedSink) -> Self {
        Self {
            identity,
            audio: None,
            video: None,
            sink,
            sink_started: false,
        }
    }

    pub(crate) fn set_audio(&mut self, audio: Arc<AudioDevice>) {
        self.audio = Some(audio);
    }

    pub(crate) fn set_video(&mut self, video: VideoDevice) {
        self.video = Some(video);
    }

    /// Start playback; stopped again on rollback
    pub(crate) fn start_sink(&mut self) -> Result<()> {
        self.sink
            .lock()
            .play()
            .map_err(|e| CaptureError::Sink(e.to_string()))?;
        self.sink_started = true;
        Ok(())
    }

    pub(crate) fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub(crate) fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Keep everything acquired so far
    pub(crate) fn commit(mut self) -> (Option<Arc<AudioDevice>>, Option<VideoDevice>) {
        self.sink_started = false;
        (self.audio.take(), self.video.take())
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if self.audio.is_none() && self.video.is_none() && !self.sink_started {
            return;
        }

        debug!("Rolling back acquisition of {}", self.identity);

        if let Some(mut video) = self.video.take() {
            video.stop_preview();
            video.destroy();
        }

        if let Some(audio) = self.audio.take() {
            if let Err(e) = audio.stop_streaming() {
                warn!("Failed to stop streaming during rollback: {}", e);
            }
            audio.close();
        }

        if self.sink_started
            && let Err(e) = self.sink.lock().stop()
        {
            warn!("Failed to stop playback during rollback: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        FakeAudioSpec, FakeDriver, FakeVideoSpec, RecordingSink, create_mock_identity,
    };
    use common::{SinkConfig, shared_sink};

    #[test]
    fn test_drop_rolls_back() {
        let driver = FakeDriver::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");
        driver.add_device(
            identity.clone(),
            Some(FakeAudioSpec::default()),
            Some(FakeVideoSpec::default()),
        );
        let (sink, log) = RecordingSink::new(SinkConfig::default());

        {
            let mut acquisition = Acquisition::new(identity.clone(), shared_sink(sink));
            let audio = Arc::new(AudioDevice::construct(&driver, &identity));
            audio.open().unwrap();
            acquisition.set_audio(audio);

            let mut video = VideoDevice::probe(&driver, &identity).unwrap();
            video.open().unwrap();
            acquisition.set_video(video);

            acquisition.start_sink().unwrap();
        }

        let audio = driver.audio_state(&identity).unwrap();
        assert!(!audio.is_open());
        assert_eq!(audio.close_count(), 1);
        assert_eq!(driver.video_state(&identity).unwrap().destroy_count(), 1);
        assert_eq!(log.play_count(), 1);
        assert_eq!(log.stop_count(), 1);
    }

    #[test]
    fn test_commit_keeps_resources() {
        let driver = FakeDriver::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");
        driver.add_device(identity.clone(), Some(FakeAudioSpec::default()), None);
        let (sink, log) = RecordingSink::new(SinkConfig::default());

        let mut acquisition = Acquisition::new(identity.clone(), shared_sink(sink));
        let audio = Arc::new(AudioDevice::construct(&driver, &identity));
        audio.open().unwrap();
        acquisition.set_audio(audio);
        acquisition.start_sink().unwrap();

        let (audio, video) = acquisition.commit();
        assert!(audio.is_some());
        assert!(video.is_none());
        assert!(driver.audio_state(&identity).unwrap().is_open());
        assert_eq!(log.stop_count(), 0);
    }
}
