//! Playback sink interface

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Output format chosen when the sink is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub sample_rate: u32,
    pub channels: u8,
    /// Buffer depth in milliseconds
    pub buffer_ms: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            buffer_ms: 200,
        }
    }
}

impl SinkConfig {
    /// Buffer capacity in 16-bit samples (all channels)
    pub fn buffer_samples(&self) -> usize {
        (self.sample_rate as usize * self.channels as usize * self.buffer_ms as usize) / 1000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("write range {offset}+{length} exceeds buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        len: usize,
    },

    #[error("sink is closed")]
    Closed,

    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Consumer of converted PCM audio
///
/// Writes come from the streaming thread, play/stop from the session worker.
/// Both go through the same [`SharedSink`] lock.
pub trait PlaybackSink: Send {
    fn config(&self) -> SinkConfig;
    fn play(&mut self) -> Result<(), SinkError>;
    /// Write `buffer[offset..offset + length]`, returning how many bytes the
    /// sink accepted
    fn write(&mut self, buffer: &[u8], offset: usize, length: usize) -> Result<usize, SinkError>;
    fn stop(&mut self) -> Result<(), SinkError>;
    fn is_playing(&self) -> bool;
}

pub type SharedSink = Arc<Mutex<Box<dyn PlaybackSink>>>;

pub fn shared_sink(sink: impl PlaybackSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Resolve `offset`/`length` against `buffer`
pub fn write_range(buffer: &[u8], offset: usize, length: usize) -> Result<&[u8], SinkError> {
    offset
        .checked_add(length)
        .and_then(|end| buffer.get(offset..end))
        .ok_or(SinkError::OutOfBounds {
            offset,
            length,
            len: buffer.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_range() {
        let buf = [1u8, 2, 3, 4];
        assert_eq!(write_range(&buf, 1, 2).unwrap(), &[2, 3]);
        assert_eq!(write_range(&buf, 4, 0).unwrap(), &[] as &[u8]);
        assert!(matches!(
            write_range(&buf, 3, 2),
            Err(SinkError::OutOfBounds { len: 4, .. })
        ));
        assert!(write_range(&buf, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_buffer_samples() {
        let config = SinkConfig::default();
        assert_eq!(config.buffer_samples(), 9600);

        let stereo = SinkConfig {
            channels: 2,
            buffer_ms: 10,
            ..Default::default()
        };
        assert_eq!(stereo.buffer_samples(), 960);
    }
}
