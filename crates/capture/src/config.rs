//! Capture daemon configuration

use crate::session::SessionSettings;
use crate::usb::{DeviceFilter, RusbOptions};
use crate::video::PreviewSettings;
use anyhow::{Context, Result, anyhow};
use common::SinkConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use types::{DEFAULT_USBFS_ROOT, FrameFormat, PreviewSize};

/// Supported range for the playback buffer depth
const BUFFER_MS_RANGE: std::ops::RangeInclusive<u32> = 10..=2000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub video: VideoSettings,
    #[serde(default)]
    pub driver: DriverSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    pub log_level: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Devices to watch, as `0xVID:0xPID` with `*` wildcards (empty = all)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Root used when a device path cannot be decomposed
    #[serde(default = "UsbSettings::default_usbfs_root")]
    pub usbfs_root: String,
    /// Report devices already attached at startup as hot-plug arrivals
    #[serde(default = "UsbSettings::default_enumerate_on_start")]
    pub enumerate_on_start: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            usbfs_root: Self::default_usbfs_root(),
            enumerate_on_start: Self::default_enumerate_on_start(),
        }
    }
}

impl UsbSettings {
    fn default_usbfs_root() -> String {
        DEFAULT_USBFS_ROOT.to_string()
    }

    fn default_enumerate_on_start() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Playback sample rate in Hz
    #[serde(default = "AudioSettings::default_sample_rate")]
    pub output_sample_rate: u32,
    /// Playback channel count (1 = mono downmix, 2 = stereo)
    #[serde(default = "AudioSettings::default_channels")]
    pub output_channels: u8,
    /// Playback buffer depth in milliseconds
    #[serde(default = "AudioSettings::default_buffer_ms")]
    pub buffer_ms: u32,
    /// Hex-dump captured frames at trace level
    #[serde(default)]
    pub diagnostics: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            output_sample_rate: Self::default_sample_rate(),
            output_channels: Self::default_channels(),
            buffer_ms: Self::default_buffer_ms(),
            diagnostics: false,
        }
    }
}

impl AudioSettings {
    fn default_sample_rate() -> u32 {
        48_000
    }

    fn default_channels() -> u8 {
        1
    }

    fn default_buffer_ms() -> u32 {
        200
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    #[serde(default = "VideoSettings::default_enabled")]
    pub enabled: bool,
    /// Format tried first during preview negotiation
    #[serde(default = "VideoSettings::default_preferred_format")]
    pub preferred_format: FrameFormat,
    /// Device default preview mode, tried when the preferred format is rejected
    #[serde(default)]
    pub fallback_format: FrameFormat,
    /// Preview size used when the device reports no sizes
    #[serde(default = "VideoSettings::default_width")]
    pub default_width: u32,
    #[serde(default = "VideoSettings::default_height")]
    pub default_height: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            preferred_format: Self::default_preferred_format(),
            fallback_format: FrameFormat::default(),
            default_width: Self::default_width(),
            default_height: Self::default_height(),
        }
    }
}

impl VideoSettings {
    fn default_enabled() -> bool {
        true
    }

    fn default_preferred_format() -> FrameFormat {
        FrameFormat::Mjpeg
    }

    fn default_width() -> u32 {
        PreviewSize::default().width
    }

    fn default_height() -> u32 {
        PreviewSize::default().height
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Timeout for UAC class control transfers
    #[serde(default = "DriverSettings::default_control_timeout")]
    pub control_timeout_ms: u64,
    /// Feature unit carrying the mute/volume controls
    #[serde(default = "DriverSettings::default_feature_unit")]
    pub feature_unit_id: u8,
    /// Read timeout of the streaming loop; bounds how long a stop waits
    #[serde(default = "DriverSettings::default_stream_timeout")]
    pub stream_read_timeout_ms: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            control_timeout_ms: Self::default_control_timeout(),
            feature_unit_id: Self::default_feature_unit(),
            stream_read_timeout_ms: Self::default_stream_timeout(),
        }
    }
}

impl DriverSettings {
    fn default_control_timeout() -> u64 {
        1000
    }

    fn default_feature_unit() -> u8 {
        2
    }

    fn default_stream_timeout() -> u64 {
        100
    }
}

impl CaptureConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-capture/capture.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: CaptureConfig =
            toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-capture").join("capture.toml")
        } else {
            PathBuf::from(".config/usb-capture/capture.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                valid_levels.join(", ")
            ));
        }

        self.device_filters()?;

        if self.usb.usbfs_root.trim().is_empty() {
            return Err(anyhow!("usbfs_root must not be empty"));
        }

        if self.audio.output_sample_rate == 0 {
            return Err(anyhow!("output_sample_rate must be greater than 0"));
        }

        if !matches!(self.audio.output_channels, 1 | 2) {
            return Err(anyhow!(
                "Invalid output_channels {}, must be 1 or 2",
                self.audio.output_channels
            ));
        }

        if !BUFFER_MS_RANGE.contains(&self.audio.buffer_ms) {
            return Err(anyhow!(
                "Invalid buffer_ms {}, must be between {} and {}",
                self.audio.buffer_ms,
                BUFFER_MS_RANGE.start(),
                BUFFER_MS_RANGE.end()
            ));
        }

        if self.video.default_width == 0 || self.video.default_height == 0 {
            return Err(anyhow!("Default preview size must be non-zero"));
        }

        if self.driver.control_timeout_ms == 0 || self.driver.stream_read_timeout_ms == 0 {
            return Err(anyhow!("Driver timeouts must be greater than 0"));
        }

        Ok(())
    }

    /// Parsed `[usb] filters`
    pub fn device_filters(&self) -> Result<Vec<DeviceFilter>> {
        self.usb
            .filters
            .iter()
            .map(|f| f.parse::<DeviceFilter>().map_err(anyhow::Error::from))
            .collect()
    }

    /// usbfs root with `~` expanded
    pub fn usbfs_root(&self) -> String {
        shellexpand::tilde(&self.usb.usbfs_root).into_owned()
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            sample_rate: self.audio.output_sample_rate,
            channels: self.audio.output_channels,
            buffer_ms: self.audio.buffer_ms,
        }
    }

    pub fn preview_settings(&self) -> PreviewSettings {
        PreviewSettings {
            preferred_format: self.video.preferred_format,
            fallback_format: self.video.fallback_format,
            default_size: PreviewSize::new(self.video.default_width, self.video.default_height),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            preview: self.preview_settings(),
            video_enabled: self.video.enabled,
            diagnostics: self.audio.diagnostics,
        }
    }

    pub fn rusb_options(&self) -> Result<RusbOptions> {
        Ok(RusbOptions {
            control_timeout: Duration::from_millis(self.driver.control_timeout_ms),
            stream_read_timeout: Duration::from_millis(self.driver.stream_read_timeout_ms),
            feature_unit_id: self.driver.feature_unit_id,
            usbfs_root: self.usbfs_root(),
            filters: self.device_filters()?,
        })
    }
}

/// Expand a leading `~` in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.audio.output_sample_rate, 48_000);
        assert_eq!(config.audio.output_channels, 1);
        assert_eq!(config.video.preferred_format, FrameFormat::Mjpeg);
        assert_eq!(config.video.fallback_format, FrameFormat::Yuyv);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = CaptureConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CaptureConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.daemon.log_level, parsed.daemon.log_level);
        assert_eq!(config.audio.buffer_ms, parsed.audio.buffer_ms);
        assert_eq!(config.video.preferred_format, parsed.video.preferred_format);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = CaptureConfig::default();
        config.daemon.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.daemon.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_audio() {
        let mut config = CaptureConfig::default();
        config.audio.output_channels = 3;
        assert!(config.validate().is_err());

        config.audio.output_channels = 2;
        config.audio.buffer_ms = 5;
        assert!(config.validate().is_err());

        config.audio.buffer_ms = 2000;
        assert!(config.validate().is_ok());

        config.audio.output_sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_path() {
        let plain = expand_path(Path::new("/etc/usb-capture/capture.toml"));
        assert_eq!(plain, PathBuf::from("/etc/usb-capture/capture.toml"));

        let expanded = expand_path(Path::new("~/capture.toml"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
