//! Audio capabilities and video preview parameters

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper volume bound reported when the device exposes no volume control
pub const DEFAULT_MAX_VOLUME: i32 = 100;

/// Capability snapshot of one UAC audio endpoint
///
/// Populated progressively: static capabilities when the device is
/// constructed, current mute/volume state when it is opened. Handed to
/// consumers by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCapabilities {
    /// Current sampling frequency in Hz
    pub sample_rate: u32,
    /// Sampling frequencies the device declares, in declaration order
    pub supported_sample_rates: Vec<u32>,
    /// Bits per sample
    pub bit_resolution: u8,
    /// Number of interleaved channels
    pub channel_count: u8,
    pub mute_available: bool,
    pub volume_available: bool,
    pub mute: bool,
    pub volume: i32,
    pub min_volume: i32,
    pub max_volume: i32,
}

impl Default for AudioCapabilities {
    fn default() -> Self {
        Self {
            sample_rate: 0,
            supported_sample_rates: Vec::new(),
            bit_resolution: 16,
            channel_count: 2,
            mute_available: false,
            volume_available: false,
            mute: false,
            volume: 0,
            min_volume: 0,
            max_volume: DEFAULT_MAX_VOLUME,
        }
    }
}

impl AudioCapabilities {
    /// Clamp a requested volume into the device range
    pub fn clamp_volume(&self, volume: i32) -> i32 {
        // `i32::clamp` panics when min > max
        let (low, high) = if self.min_volume <= self.max_volume {
            (self.min_volume, self.max_volume)
        } else {
            (self.max_volume, self.min_volume)
        };
        volume.clamp(low, high)
    }

    /// Bytes per interleaved sample frame (all channels)
    pub fn frame_bytes(&self) -> usize {
        (self.bit_resolution as usize).div_ceil(8) * self.channel_count as usize
    }
}

/// Parse a comma-separated sampling frequency list
///
/// Tokens that are not unsigned integers are skipped, so a malformed
/// capability string degrades to a shorter list instead of an error.
///
/// ```
/// assert_eq!(
///     types::parse_sample_rates("44100,48000,bad,96000"),
///     vec![44100, 48000, 96000]
/// );
/// ```
pub fn parse_sample_rates(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|token| token.trim().parse::<u32>().ok())
        .collect()
}

/// Video preview dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for PreviewSize {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl fmt::Display for PreviewSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// UVC frame format used for preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// Uncompressed YUYV, the device default preview mode
    #[default]
    Yuyv,
    /// Motion JPEG
    Mjpeg,
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameFormat::Yuyv => write!(f, "yuyv"),
            FrameFormat::Mjpeg => write!(f, "mjpeg"),
        }
    }
}
