//! Playback sink implementations

use common::{PlaybackSink, SharedSink, SinkConfig, SinkError, shared_sink};
use tracing::info;

/// Sink that accepts and counts everything; used when no audio output is
/// compiled in
pub struct DiscardSink {
    config: SinkConfig,
    playing: bool,
    discarded: u64,
}

impl DiscardSink {
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            playing: false,
            discarded: 0,
        }
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl PlaybackSink for DiscardSink {
    fn config(&self) -> SinkConfig {
        self.config
    }

    fn play(&mut self) -> Result<(), SinkError> {
        self.playing = true;
        Ok(())
    }

    fn write(&mut self, buffer: &[u8], offset: usize, length: usize) -> Result<usize, SinkError> {
        let data = common::sink::write_range(buffer, offset, length)?;
        self.discarded += data.len() as u64;
        Ok(data.len())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.playing = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Build the playback sink for this build
#[cfg(feature = "cpal")]
pub fn build_sink(config: SinkConfig) -> anyhow::Result<SharedSink> {
    let sink = cpal_sink::CpalSink::open(config)?;
    info!(
        "Audio output: {} Hz, {} channel(s), {} ms buffer",
        config.sample_rate, config.channels, config.buffer_ms
    );
    Ok(shared_sink(sink))
}

/// Build the playback sink for this build
#[cfg(not(feature = "cpal"))]
pub fn build_sink(config: SinkConfig) -> anyhow::Result<SharedSink> {
    info!("Built without audio output; captured audio is discarded");
    Ok(shared_sink(DiscardSink::new(config)))
}

#[cfg(feature = "cpal")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "cpal")]
mod cpal_sink {
    use anyhow::{Context, Result, anyhow};
    use byteorder::{ByteOrder, LittleEndian};
    use common::{PlaybackSink, SinkConfig, SinkError};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use rb::{Producer, RB, RbConsumer, RbProducer, SpscRb};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread::JoinHandle;
    use std::time::Duration;
    use tracing::{debug, warn};

    enum OutputCommand {
        Play(mpsc::SyncSender<Result<(), String>>),
        Pause(mpsc::SyncSender<Result<(), String>>),
    }

    /// System audio output through cpal
    ///
    /// cpal streams are not `Send` on every platform, so the stream lives on
    /// an `audio-output` thread and is driven by commands. Samples travel
    /// through an `rb` ring buffer; when it is full the write is short.
    pub struct CpalSink {
        config: SinkConfig,
        producer: Producer<f32>,
        commands: Option<mpsc::Sender<OutputCommand>>,
        thread: Option<JoinHandle<()>>,
        stream_closed: Arc<AtomicBool>,
        playing: bool,
        samples: Vec<f32>,
    }

    impl CpalSink {
        pub fn open(config: SinkConfig) -> Result<Self> {
            let buffer = SpscRb::<f32>::new(config.buffer_samples().max(1));
            let producer = buffer.producer();
            let consumer = buffer.consumer();

            let stream_closed = Arc::new(AtomicBool::new(false));
            let stream_closed_inner = stream_closed.clone();

            let (command_tx, command_rx) = mpsc::channel::<OutputCommand>();
            let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

            let thread = std::thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || {
                    let stream = (|| -> Result<cpal::Stream> {
                        let device = cpal::default_host()
                            .default_output_device()
                            .ok_or_else(|| anyhow!("No default output device"))?;

                        let stream_config = cpal::StreamConfig {
                            channels: config.channels as cpal::ChannelCount,
                            sample_rate: cpal::SampleRate(config.sample_rate),
                            buffer_size: cpal::BufferSize::Default,
                        };

                        let stream = device.build_output_stream(
                            &stream_config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                let written = consumer.read(data).unwrap_or(0);
                                data[written..].iter_mut().for_each(|s| *s = 0.0);
                            },
                            move |e| {
                                warn!("Error on playback stream, stopping: {}", e);
                                stream_closed_inner.store(true, Ordering::Relaxed);
                            },
                            Some(Duration::from_millis(500)),
                        )?;
                        Ok(stream)
                    })();

                    let stream = match stream {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{:#}", e)));
                            return;
                        }
                    };

                    while let Ok(command) = command_rx.recv() {
                        match command {
                            OutputCommand::Play(reply) => {
                                let _ = reply.send(stream.play().map_err(|e| e.to_string()));
                            }
                            OutputCommand::Pause(reply) => {
                                let _ = reply.send(stream.pause().map_err(|e| e.to_string()));
                            }
                        }
                    }
                    debug!("Audio output thread exiting");
                })
                .context("Failed to spawn audio output thread")?;

            ready_rx
                .recv()
                .context("Audio output thread exited during setup")?
                .map_err(|e| anyhow!("Failed to open audio output: {}", e))?;

            Ok(Self {
                config,
                producer,
                commands: Some(command_tx),
                thread: Some(thread),
                stream_closed,
                playing: false,
                samples: Vec::new(),
            })
        }

        fn command(
            &self,
            make: impl FnOnce(mpsc::SyncSender<Result<(), String>>) -> OutputCommand,
        ) -> Result<(), SinkError> {
            let commands = self.commands.as_ref().ok_or(SinkError::Closed)?;
            let (reply_tx, reply_rx) = mpsc::sync_channel(1);
            commands
                .send(make(reply_tx))
                .map_err(|_| SinkError::Closed)?;
            reply_rx
                .recv()
                .map_err(|_| SinkError::Closed)?
                .map_err(SinkError::Backend)
        }
    }

    impl PlaybackSink for CpalSink {
        fn config(&self) -> SinkConfig {
            self.config
        }

        fn play(&mut self) -> Result<(), SinkError> {
            self.command(OutputCommand::Play)?;
            self.playing = true;
            Ok(())
        }

        fn write(
            &mut self,
            buffer: &[u8],
            offset: usize,
            length: usize,
        ) -> Result<usize, SinkError> {
            if self.stream_closed.load(Ordering::Relaxed) {
                return Err(SinkError::Closed);
            }

            let data = common::sink::write_range(buffer, offset, length)?;
            self.samples.clear();
            self.samples.extend(
                data.chunks_exact(2)
                    .map(|s| LittleEndian::read_i16(s) as f32 / i16::MAX as f32),
            );

            if self.samples.is_empty() {
                return Ok(0);
            }

            // A full ring buffer accepts nothing
            let written = self.producer.write(&self.samples).unwrap_or(0);
            Ok(written * 2)
        }

        fn stop(&mut self) -> Result<(), SinkError> {
            self.command(OutputCommand::Pause)?;
            self.playing = false;
            Ok(())
        }

        fn is_playing(&self) -> bool {
            self.playing
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            self.commands.take();
            if let Some(thread) = self.thread.take()
                && thread.join().is_err()
            {
                warn!("Audio output thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_sink() {
        let mut sink = DiscardSink::new(SinkConfig::default());
        assert!(!sink.is_playing());

        sink.play().unwrap();
        assert!(sink.is_playing());
        assert_eq!(sink.write(&[0u8; 10], 2, 6).unwrap(), 6);
        assert!(sink.write(&[0u8; 10], 8, 6).is_err());
        assert_eq!(sink.discarded(), 6);

        sink.stop().unwrap();
        assert!(!sink.is_playing());
    }

    #[test]
    fn test_default_build_plays_audio() {
        let manifest: toml::Table = toml::from_str(include_str!("../../Cargo.toml")).unwrap();
        let defaults = manifest["features"]["default"].as_array().unwrap();
        assert!(defaults.iter().any(|feature| feature.as_str() == Some("cpal")));
    }

    #[cfg(not(feature = "cpal"))]
    #[test]
    fn test_build_sink_without_output() {
        let sink = build_sink(SinkConfig::default()).unwrap();
        let mut sink = sink.lock();
        assert_eq!(sink.config(), SinkConfig::default());
        sink.play().unwrap();
        assert!(sink.is_playing());
    }
}
