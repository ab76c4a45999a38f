//! UVC preview endpoint wrapper

use common::{NativeDriver, NativeVideo, SurfaceRef};
use tracing::{debug, info, warn};
use types::{CaptureError, DeviceIdentity, FrameFormat, PreviewSize, Result};

/// Preview negotiation preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSettings {
    pub preferred_format: FrameFormat,
    /// Device default preview mode
    pub fallback_format: FrameFormat,
    /// Used when the device reports no sizes
    pub default_size: PreviewSize,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            preferred_format: FrameFormat::Mjpeg,
            fallback_format: FrameFormat::Yuyv,
            default_size: PreviewSize::default(),
        }
    }
}

/// One UVC video endpoint of the session's device
pub struct VideoDevice {
    identity: DeviceIdentity,
    native: Option<Box<dyn NativeVideo>>,
    opened: bool,
    previewing: bool,
    preview: Option<(PreviewSize, FrameFormat)>,
    surface: Option<SurfaceRef>,
}

impl VideoDevice {
    /// Resolve the video endpoint of `identity`, if it has one
    pub fn probe(driver: &dyn NativeDriver, identity: &DeviceIdentity) -> Option<Self> {
        let native = driver.find_video(identity)?;
        Some(Self {
            identity: identity.clone(),
            native: Some(native),
            opened: false,
            previewing: false,
            preview: None,
            surface: None,
        })
    }

    fn native(&mut self) -> Result<&mut Box<dyn NativeVideo>> {
        self.native.as_mut().ok_or(CaptureError::DeviceUnavailable)
    }

    pub fn open(&mut self) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.native()?
            .open()
            .map_err(|e| CaptureError::OpenFailed { code: e.code() })?;
        self.opened = true;
        debug!("Opened video on {}", self.identity);
        Ok(())
    }

    pub fn supported_sizes(&self) -> Vec<PreviewSize> {
        match self.native.as_ref().map(|n| n.supported_sizes()) {
            Some(Ok(sizes)) => sizes,
            Some(Err(e)) => {
                debug!("Size query failed on {}: {}", self.identity, e);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    pub fn set_preview_size(&mut self, size: PreviewSize, format: FrameFormat) -> Result<()> {
        self.native()?
            .set_preview_size(size, format)
            .map_err(|e| CaptureError::ControlRejected {
                control: "preview size",
                code: e.code(),
            })?;
        self.preview = Some((size, format));
        Ok(())
    }

    /// Configure the first supported size, preferred format first, then the
    /// device default preview mode
    pub fn negotiate(&mut self, settings: &PreviewSettings) -> Result<PreviewSize> {
        let size = self
            .supported_sizes()
            .first()
            .copied()
            .unwrap_or(settings.default_size);

        match self.set_preview_size(size, settings.preferred_format) {
            Ok(()) => {
                info!(
                    "Preview on {}: {} {}",
                    self.identity, size, settings.preferred_format
                );
                return Ok(size);
            }
            Err(e) => debug!(
                "Preview {} {} rejected on {}: {}",
                size, settings.preferred_format, self.identity, e
            ),
        }

        self.set_preview_size(size, settings.fallback_format)?;
        info!(
            "Preview on {}: {} {} (fallback)",
            self.identity, size, settings.fallback_format
        );
        Ok(size)
    }

    /// Bind or release the render target
    pub fn set_preview_display(&mut self, surface: Option<SurfaceRef>) -> Result<()> {
        self.native()?.set_preview_display(surface.clone())?;
        self.surface = surface;
        Ok(())
    }

    pub fn start_preview(&mut self) -> Result<()> {
        if self.previewing {
            return Ok(());
        }
        self.native()?.start_preview()?;
        self.previewing = true;
        info!("Preview started on {}", self.identity);
        Ok(())
    }

    pub fn stop_preview(&mut self) {
        if !self.previewing {
            return;
        }
        if let Some(native) = self.native.as_mut() {
            native.stop_preview();
        }
        self.previewing = false;
        info!("Preview stopped on {}", self.identity);
    }

    /// Stop preview, release the surface and the native handle; idempotent
    pub fn destroy(&mut self) {
        let Some(mut native) = self.native.take() else {
            return;
        };

        if self.previewing {
            native.stop_preview();
            self.previewing = false;
        }
        if self.surface.take().is_some()
            && let Err(e) = native.set_preview_display(None)
        {
            warn!("Failed to release preview surface: {}", e);
        }
        native.destroy();
        self.opened = false;
        debug!("Destroyed video on {}", self.identity);
    }

    pub fn is_previewing(&self) -> bool {
        self.previewing
    }

    pub fn preview_size(&self) -> Option<PreviewSize> {
        self.preview.map(|(size, _)| size)
    }

    pub fn preview_format(&self) -> Option<FrameFormat> {
        self.preview.map(|(_, format)| format)
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }
}

impl Drop for VideoDevice {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{FakeDriver, FakeSurface, FakeVideoSpec, create_mock_identity};

    fn video_with(spec: FakeVideoSpec) -> (FakeDriver, DeviceIdentity) {
        let driver = FakeDriver::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");
        driver.add_device(identity.clone(), None, Some(spec));
        (driver, identity)
    }

    #[test]
    fn test_probe_without_video() {
        let driver = FakeDriver::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");
        driver.add_device(identity.clone(), None, None);
        assert!(VideoDevice::probe(&driver, &identity).is_none());
    }

    #[test]
    fn test_negotiate_prefers_first_size_and_format() {
        let (driver, identity) = video_with(FakeVideoSpec::default());
        let mut video = VideoDevice::probe(&driver, &identity).unwrap();
        video.open().unwrap();

        let size = video.negotiate(&PreviewSettings::default()).unwrap();
        assert_eq!(size, PreviewSize::new(640, 480));
        assert_eq!(video.preview_format(), Some(FrameFormat::Mjpeg));
    }

    #[test]
    fn test_negotiate_falls_back_to_default_mode() {
        let (driver, identity) = video_with(FakeVideoSpec {
            accepted_formats: vec![FrameFormat::Yuyv],
            ..Default::default()
        });
        let mut video = VideoDevice::probe(&driver, &identity).unwrap();
        video.open().unwrap();

        video.negotiate(&PreviewSettings::default()).unwrap();
        assert_eq!(video.preview_format(), Some(FrameFormat::Yuyv));

        let state = driver.video_state(&identity).unwrap();
        assert_eq!(state.size_requests().len(), 2);
    }

    #[test]
    fn test_negotiate_fails_when_both_rejected() {
        let (driver, identity) = video_with(FakeVideoSpec {
            accepted_formats: Vec::new(),
            ..Default::default()
        });
        let mut video = VideoDevice::probe(&driver, &identity).unwrap();
        video.open().unwrap();

        assert!(matches!(
            video.negotiate(&PreviewSettings::default()),
            Err(CaptureError::ControlRejected {
                control: "preview size",
                ..
            })
        ));
        assert_eq!(video.preview_size(), None);
    }

    #[test]
    fn test_preview_requires_surface() {
        let (driver, identity) = video_with(FakeVideoSpec::default());
        let mut video = VideoDevice::probe(&driver, &identity).unwrap();
        video.open().unwrap();
        video.negotiate(&PreviewSettings::default()).unwrap();

        assert!(video.start_preview().is_err());
        assert!(!video.is_previewing());

        video
            .set_preview_display(Some(FakeSurface::new_ref(7)))
            .unwrap();
        video.start_preview().unwrap();
        assert!(video.is_previewing());

        let state = driver.video_state(&identity).unwrap();
        assert_eq!(state.bound_surface(), Some(7));
        assert!(state.is_previewing());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (driver, identity) = video_with(FakeVideoSpec::default());
        let mut video = VideoDevice::probe(&driver, &identity).unwrap();
        video.open().unwrap();
        video
            .set_preview_display(Some(FakeSurface::new_ref(1)))
            .unwrap();
        video.start_preview().unwrap();

        video.destroy();
        video.destroy();
        drop(video);

        let state = driver.video_state(&identity).unwrap();
        assert_eq!(state.destroy_count(), 1);
        assert_eq!(state.preview_stops(), 1);
        assert_eq!(state.bound_surface(), None);
    }
}
