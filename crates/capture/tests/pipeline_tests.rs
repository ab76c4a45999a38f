//! Audio Pipeline Integration Tests
//!
//! Run with: `cargo test -p capture --test pipeline_tests`

use capture::audio::{AudioPipeline, ChannelMapping, stereo_to_mono, stereo_to_mono_into};
use common::test_utils::{RecordingSink, create_stereo_frame};
use common::{SinkConfig, StreamMetrics, shared_sink};
use std::sync::Arc;
use types::CaptureError;

#[test]
fn test_downmix_keeps_left_bytes_for_every_length() {
    let input: Vec<u8> = (0..=255u8).cycle().take(1031).collect();
    let mut reused = Vec::new();

    for len in 0..input.len() {
        let output = stereo_to_mono(&input[..len]);
        assert_eq!(output.len(), (len / 4) * 2, "length {}", len);
        for i in 0..len / 4 {
            assert_eq!(output[2 * i], input[4 * i]);
            assert_eq!(output[2 * i + 1], input[4 * i + 1]);
        }

        stereo_to_mono_into(&input[..len], &mut reused);
        assert_eq!(reused, output);
    }
}

#[test]
fn test_short_writes_are_counted_and_stream_continues() {
    let (sink, log) = RecordingSink::new(SinkConfig::default());
    let sink = shared_sink(sink.with_accept_limit(6));
    let metrics = Arc::new(StreamMetrics::new());
    let mut pipeline = AudioPipeline::new(sink, ChannelMapping::StereoToMono, metrics.clone());

    let frame = create_stereo_frame(8);
    for _ in 0..3 {
        match pipeline.process(&frame) {
            Err(CaptureError::ShortWrite { offered, written }) => {
                assert_eq!(offered, 16);
                assert_eq!(written, 6);
            }
            other => panic!("expected short write, got {:?}", other),
        }
    }

    assert_eq!(metrics.short_writes(), 3);
    assert_eq!(metrics.bytes_played(), 18);
    assert_eq!(log.write_count(), 3);
}

#[test]
fn test_handler_swallows_short_writes() {
    let (sink, log) = RecordingSink::new(SinkConfig::default());
    let sink = shared_sink(sink.with_accept_limit(2));
    let metrics = Arc::new(StreamMetrics::new());
    let mut handler =
        AudioPipeline::new(sink, ChannelMapping::Passthrough, metrics.clone()).into_handler();

    handler(&[1, 2, 3, 4]);
    handler(&[5, 6, 7, 8]);

    assert_eq!(log.written(), vec![1, 2, 5, 6]);
    assert_eq!(metrics.short_writes(), 2);
}
