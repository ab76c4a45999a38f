//! Frame conversion and playback
//!
//! The pipeline is the single consumer of an audio device's frames. It
//! converts each frame to the sink's channel layout and writes the result
//! synchronously, on the streaming thread, before the next frame is read.

use common::{FrameHandler, SharedSink, StreamMetrics};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use types::CaptureError;

/// Largest chunk of input converted and written in one sink call
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// How captured channels map onto the sink's channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMapping {
    Passthrough,
    /// Keep the left channel of 16-bit interleaved stereo
    StereoToMono,
    /// Duplicate each 16-bit sample into both channels
    MonoToStereo,
}

impl ChannelMapping {
    pub fn for_channels(device_channels: u8, sink_channels: u8) -> Self {
        match (device_channels, sink_channels) {
            (2, 1) => ChannelMapping::StereoToMono,
            (1, 2) => ChannelMapping::MonoToStereo,
            _ => ChannelMapping::Passthrough,
        }
    }

    /// Input bytes that form one indivisible unit
    fn input_unit(self) -> usize {
        match self {
            ChannelMapping::Passthrough => 1,
            ChannelMapping::StereoToMono => 4,
            ChannelMapping::MonoToStereo => 2,
        }
    }

    fn convert_into(self, input: &[u8], output: &mut Vec<u8>) {
        match self {
            ChannelMapping::Passthrough => {
                output.clear();
                output.extend_from_slice(input);
            }
            ChannelMapping::StereoToMono => stereo_to_mono_into(input, output),
            ChannelMapping::MonoToStereo => mono_to_stereo_into(input, output),
        }
    }
}

/// Left-channel downmix of 16-bit little-endian interleaved stereo
///
/// Output byte `2i` is input byte `4i` and `2i+1` is `4i+1`. Trailing bytes
/// that do not make up a whole stereo pair are dropped.
pub fn stereo_to_mono(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() / 2);
    stereo_to_mono_into(input, &mut output);
    output
}

/// [`stereo_to_mono`] into a reused buffer
pub fn stereo_to_mono_into(input: &[u8], output: &mut Vec<u8>) {
    output.clear();
    output.extend(input.chunks_exact(4).flat_map(|pair| [pair[0], pair[1]]));
}

/// Duplicate each 16-bit sample into a left/right pair
pub fn mono_to_stereo(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 2);
    mono_to_stereo_into(input, &mut output);
    output
}

pub fn mono_to_stereo_into(input: &[u8], output: &mut Vec<u8>) {
    output.clear();
    output.extend(
        input
            .chunks_exact(2)
            .flat_map(|sample| [sample[0], sample[1], sample[0], sample[1]]),
    );
}

/// Hex dump of at most `limit` bytes of a frame
pub fn format_frame_hex(frame: &[u8], limit: usize) -> String {
    let shown = &frame[..frame.len().min(limit)];
    let mut out = String::with_capacity(shown.len() * 3 + 8);
    for (i, byte) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    if frame.len() > limit {
        let _ = write!(out, " .. (+{} bytes)", frame.len() - limit);
    }
    out
}

/// Streaming consumer writing converted frames to the playback sink
pub struct AudioPipeline {
    sink: SharedSink,
    mapping: ChannelMapping,
    scratch: Vec<u8>,
    metrics: Arc<StreamMetrics>,
    diagnostics: bool,
}

impl AudioPipeline {
    pub fn new(sink: SharedSink, mapping: ChannelMapping, metrics: Arc<StreamMetrics>) -> Self {
        Self {
            sink,
            mapping,
            scratch: Vec::with_capacity(MAX_FRAME_BYTES * 2),
            metrics,
            diagnostics: false,
        }
    }

    /// Hex-dump every frame at trace level
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    pub fn mapping(&self) -> ChannelMapping {
        self.mapping
    }

    /// Convert one frame and write it to the sink
    ///
    /// Returns the number of bytes the sink accepted. A short write is
    /// reported but does not stop the stream; the remainder of the frame is
    /// not retried.
    pub fn process(&mut self, frame: &[u8]) -> Result<usize, CaptureError> {
        if self.diagnostics {
            trace!("frame[{}]: {}", frame.len(), format_frame_hex(frame, 32));
        }

        let unit = self.mapping.input_unit();
        let chunk_len = MAX_FRAME_BYTES - MAX_FRAME_BYTES % unit;
        let mut total = 0;

        for chunk in frame.chunks(chunk_len) {
            self.mapping.convert_into(chunk, &mut self.scratch);
            let offered = self.scratch.len();
            if offered == 0 {
                continue;
            }

            let written = {
                let mut sink = self.sink.lock();
                sink.write(&self.scratch, 0, offered)
            };

            let written = match written {
                Ok(written) => written,
                Err(e) => {
                    self.metrics.record_sink_error();
                    return Err(CaptureError::Sink(e.to_string()));
                }
            };

            self.metrics.record_played(written);
            total += written;

            if written < offered {
                let count = self.metrics.record_short_write();
                debug!(
                    "Short write to sink: {} of {} bytes ({} short writes)",
                    written, offered, count
                );
                return Err(CaptureError::ShortWrite { offered, written });
            }
        }

        Ok(total)
    }

    /// Turn the pipeline into a streaming callback
    ///
    /// Errors are already counted in the metrics; the callback only logs them.
    pub fn into_handler(mut self) -> FrameHandler {
        Box::new(move |frame| match self.process(frame) {
            Ok(_) | Err(CaptureError::ShortWrite { .. }) => {}
            Err(e) => warn!("Audio pipeline error: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{RecordingSink, create_stereo_frame};
    use common::{SinkConfig, shared_sink};

    #[test]
    fn test_stereo_to_mono_indices() {
        for len in 0..64 {
            let input: Vec<u8> = (0..len as u8).collect();
            let output = stereo_to_mono(&input);

            assert_eq!(output.len(), 2 * (len / 4));
            for i in 0..len / 4 {
                assert_eq!(output[2 * i], input[4 * i]);
                assert_eq!(output[2 * i + 1], input[4 * i + 1]);
            }
        }
    }

    #[test]
    fn test_stereo_to_mono_drops_partial_pair() {
        assert_eq!(stereo_to_mono(&[1, 2, 3, 4, 5, 6, 7]), vec![1, 2]);
        assert!(stereo_to_mono(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn test_mono_to_stereo() {
        assert_eq!(
            mono_to_stereo(&[1, 2, 3, 4, 5]),
            vec![1, 2, 1, 2, 3, 4, 3, 4]
        );
    }

    #[test]
    fn test_channel_mapping_selection() {
        assert_eq!(ChannelMapping::for_channels(2, 1), ChannelMapping::StereoToMono);
        assert_eq!(ChannelMapping::for_channels(1, 2), ChannelMapping::MonoToStereo);
        assert_eq!(ChannelMapping::for_channels(2, 2), ChannelMapping::Passthrough);
        assert_eq!(ChannelMapping::for_channels(1, 1), ChannelMapping::Passthrough);
    }

    #[test]
    fn test_format_frame_hex() {
        assert_eq!(format_frame_hex(&[0x00, 0xab, 0x10], 8), "00 ab 10");
        assert_eq!(format_frame_hex(&[1, 2, 3, 4], 2), "01 02 .. (+2 bytes)");
        assert_eq!(format_frame_hex(&[], 4), "");
    }

    #[test]
    fn test_process_writes_left_channel() {
        let (sink, log) = RecordingSink::new(SinkConfig::default());
        let metrics = Arc::new(StreamMetrics::new());
        let mut pipeline =
            AudioPipeline::new(shared_sink(sink), ChannelMapping::StereoToMono, metrics.clone());

        let frame = create_stereo_frame(3);
        assert_eq!(pipeline.process(&frame).unwrap(), 6);
        assert_eq!(log.written(), vec![0, 0, 1, 0, 2, 0]);
        assert_eq!(metrics.bytes_played(), 6);
    }

    #[test]
    fn test_process_chunks_large_frames() {
        let (sink, log) = RecordingSink::new(SinkConfig::default());
        let metrics = Arc::new(StreamMetrics::new());
        let mut pipeline =
            AudioPipeline::new(shared_sink(sink), ChannelMapping::Passthrough, metrics);

        let frame = vec![7u8; MAX_FRAME_BYTES * 2 + 10];
        assert_eq!(pipeline.process(&frame).unwrap(), frame.len());
        assert_eq!(log.write_count(), 3);
    }

    #[test]
    fn test_short_write_is_reported() {
        let (sink, log) = RecordingSink::new(SinkConfig::default());
        let sink = sink.with_accept_limit(4);
        let metrics = Arc::new(StreamMetrics::new());
        let mut pipeline =
            AudioPipeline::new(shared_sink(sink), ChannelMapping::StereoToMono, metrics.clone());

        let frame = create_stereo_frame(4);
        let err = pipeline.process(&frame).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::ShortWrite {
                offered: 8,
                written: 4
            }
        ));
        assert_eq!(metrics.short_writes(), 1);
        assert_eq!(log.written().len(), 4);

        // The stream keeps going
        let mut handler = pipeline.into_handler();
        handler(&frame);
        assert_eq!(metrics.short_writes(), 2);
    }
}
