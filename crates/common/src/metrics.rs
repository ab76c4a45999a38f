//! Streaming metrics for the audio capture path
//!
//! Counters are updated from the native streaming thread and read from the
//! UI, so everything is atomics plus a short-held lock around the rolling
//! throughput window.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Rolling window size (10 seconds worth of 100ms samples)
const ROLLING_WINDOW_SIZE: usize = 100;

/// Sample interval for the rolling window (100ms)
pub const SAMPLE_INTERVAL_MS: u64 = 100;

pub fn rolling_window_duration() -> Duration {
    Duration::from_millis(SAMPLE_INTERVAL_MS * ROLLING_WINDOW_SIZE as u64)
}

#[derive(Debug, Clone, Copy)]
struct ThroughputSample {
    bytes: u64,
    timestamp: Instant,
}

/// Rolling throughput calculator
#[derive(Debug)]
struct RollingThroughput {
    samples: VecDeque<ThroughputSample>,
    window_duration: Duration,
}

impl RollingThroughput {
    fn new(window_duration: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(ROLLING_WINDOW_SIZE),
            window_duration,
        }
    }

    fn add_sample(&mut self, bytes: u64, now: Instant) {
        self.samples.push_back(ThroughputSample {
            bytes,
            timestamp: now,
        });
        self.prune_old_samples(now);
    }

    fn prune_old_samples(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window_duration) else {
            return;
        };
        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second over the rolling window
    fn bytes_per_second(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }

        // The first sample marks the start of the measured span
        let total_bytes: u64 = self.samples.iter().skip(1).map(|s| s.bytes).sum();
        let first = self.samples.front().map(|s| s.timestamp);
        let last = self.samples.back().map(|s| s.timestamp);

        match (first, last) {
            (Some(first), Some(last)) => {
                let duration = last.duration_since(first);
                if duration.as_secs_f64() > 0.0 {
                    total_bytes as f64 / duration.as_secs_f64()
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

/// Counters for one audio stream
#[derive(Debug)]
pub struct StreamMetrics {
    /// Frames delivered by the native streaming loop
    frames_delivered: AtomicU64,
    /// Raw bytes captured from the device
    bytes_captured: AtomicU64,
    /// Converted bytes accepted by the playback sink
    bytes_played: AtomicU64,
    short_writes: AtomicU64,
    /// Frames that arrived after the stream was cancelled
    frames_dropped: AtomicU64,
    sink_errors: AtomicU64,
    throughput: RwLock<RollingThroughput>,
    started_at: RwLock<Option<Instant>>,
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            frames_delivered: AtomicU64::new(0),
            bytes_captured: AtomicU64::new(0),
            bytes_played: AtomicU64::new(0),
            short_writes: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            sink_errors: AtomicU64::new(0),
            throughput: RwLock::new(RollingThroughput::new(rolling_window_duration())),
            started_at: RwLock::new(None),
        }
    }

    /// Mark the stream as started
    pub fn mark_started(&self) {
        *self.started_at.write() = Some(Instant::now());
    }

    /// Mark the stream as stopped
    pub fn mark_stopped(&self) {
        *self.started_at.write() = None;
    }

    /// Time since the stream started, if it is running
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.read().map(|t| t.elapsed())
    }

    /// Record a frame delivered by the device
    pub fn record_frame(&self, bytes: usize) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_captured
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.throughput.write().add_sample(bytes as u64, Instant::now());
    }

    /// Record bytes accepted by the sink
    pub fn record_played(&self, bytes: usize) {
        self.bytes_played.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a short write, returning the running count
    pub fn record_short_write(&self) -> u64 {
        self.short_writes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn bytes_captured(&self) -> u64 {
        self.bytes_captured.load(Ordering::Relaxed)
    }

    pub fn bytes_played(&self) -> u64 {
        self.bytes_played.load(Ordering::Relaxed)
    }

    pub fn short_writes(&self) -> u64 {
        self.short_writes.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn sink_errors(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }

    /// Capture rate in bytes per second over the rolling window
    pub fn capture_bps(&self) -> f64 {
        self.throughput.read().bytes_per_second()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot::from_metrics(self)
    }
}

/// Point-in-time copy of [`StreamMetrics`] for display
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub frames_delivered: u64,
    pub bytes_captured: u64,
    pub bytes_played: u64,
    pub short_writes: u64,
    pub frames_dropped: u64,
    pub sink_errors: u64,
    pub capture_bps: f64,
    pub uptime: Option<Duration>,
}

impl StreamSnapshot {
    pub fn from_metrics(metrics: &StreamMetrics) -> Self {
        Self {
            frames_delivered: metrics.frames_delivered(),
            bytes_captured: metrics.bytes_captured(),
            bytes_played: metrics.bytes_played(),
            short_writes: metrics.short_writes(),
            frames_dropped: metrics.frames_dropped(),
            sink_errors: metrics.sink_errors(),
            capture_bps: metrics.capture_bps(),
            uptime: metrics.uptime(),
        }
    }

    pub fn format_capture_rate(&self) -> String {
        format_bytes_per_second(self.capture_bps)
    }

    pub fn format_uptime(&self) -> String {
        match self.uptime {
            Some(d) => format_duration(d),
            None => "N/A".to_string(),
        }
    }

    /// Fraction of captured frames that hit a short write
    pub fn short_write_rate(&self) -> f64 {
        if self.frames_delivered == 0 {
            0.0
        } else {
            self.short_writes as f64 / self.frames_delivered as f64
        }
    }
}

impl std::fmt::Display for StreamSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} captured, {} played, {} ({} short writes, {} dropped, up {})",
            self.frames_delivered,
            format_bytes(self.bytes_captured),
            format_bytes(self.bytes_played),
            self.format_capture_rate(),
            self.short_writes,
            self.frames_dropped,
            self.format_uptime()
        )
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format bytes per second as human-readable string
pub fn format_bytes_per_second(bps: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    if bps >= MB {
        format!("{:.2} MB/s", bps / MB)
    } else if bps >= KB {
        format!("{:.2} KB/s", bps / KB)
    } else {
        format!("{:.0} B/s", bps)
    }
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_metrics_basic() {
        let metrics = StreamMetrics::new();

        metrics.record_frame(192);
        metrics.record_frame(192);
        metrics.record_played(96);
        assert_eq!(metrics.record_short_write(), 1);
        assert_eq!(metrics.record_short_write(), 2);
        metrics.record_dropped();

        assert_eq!(metrics.frames_delivered(), 2);
        assert_eq!(metrics.bytes_captured(), 384);
        assert_eq!(metrics.bytes_played(), 96);
        assert_eq!(metrics.short_writes(), 2);
        assert_eq!(metrics.frames_dropped(), 1);
    }

    #[test]
    fn test_rolling_throughput() {
        let mut window = RollingThroughput::new(Duration::from_secs(10));
        let start = Instant::now();

        window.add_sample(1000, start);
        assert_eq!(window.bytes_per_second(), 0.0);

        window.add_sample(1000, start + Duration::from_millis(500));
        window.add_sample(1000, start + Duration::from_secs(1));
        assert!((window.bytes_per_second() - 2000.0).abs() < 1.0);
    }

    #[test]
    fn test_rolling_window_prunes() {
        let mut window = RollingThroughput::new(Duration::from_secs(1));
        let start = Instant::now();

        window.add_sample(10, start);
        window.add_sample(10, start + Duration::from_millis(500));
        window.add_sample(10, start + Duration::from_secs(3));
        assert_eq!(window.samples.len(), 1);
    }

    #[test]
    fn test_uptime() {
        let metrics = StreamMetrics::new();
        assert!(metrics.uptime().is_none());

        metrics.mark_started();
        assert!(metrics.uptime().is_some());

        metrics.mark_stopped();
        assert!(metrics.snapshot().uptime.is_none());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes_per_second(192_000.0), "187.50 KB/s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_short_write_rate() {
        let metrics = StreamMetrics::new();
        for _ in 0..4 {
            metrics.record_frame(4);
        }
        metrics.record_short_write();

        let snapshot = metrics.snapshot();
        assert!((snapshot.short_write_rate() - 0.25).abs() < f64::EPSILON);
    }
}
