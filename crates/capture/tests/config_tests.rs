//! Configuration Integration Tests
//!
//! Run with: `cargo test -p capture --test config_tests`

use capture::config::CaptureConfig;
use capture::usb::DeviceFilter;
use tempfile::TempDir;
use types::{FrameFormat, PreviewSize};

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("capture.toml");

    let mut config = CaptureConfig::default();
    config.daemon.log_level = "debug".to_string();
    config.usb.filters = vec!["0d8c:*".to_string()];
    config.audio.output_channels = 2;
    config.video.enabled = false;
    config.save(&path).unwrap();

    let loaded = CaptureConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.daemon.log_level, "debug");
    assert_eq!(loaded.usb.filters, vec!["0d8c:*".to_string()]);
    assert_eq!(loaded.audio.output_channels, 2);
    assert!(!loaded.video.enabled);
}

#[test]
fn test_partial_file_uses_defaults() {
    let config = CaptureConfig::from_toml(
        r#"
[usb]
filters = ["1234:5678"]

[video]
preferred_format = "yuyv"
default_width = 320
default_height = 240
"#,
    )
    .unwrap();

    assert_eq!(config.daemon.log_level, "info");
    assert_eq!(
        config.device_filters().unwrap(),
        vec![DeviceFilter::exact(0x1234, 0x5678)]
    );

    let preview = config.preview_settings();
    assert_eq!(preview.preferred_format, FrameFormat::Yuyv);
    assert_eq!(preview.default_size, PreviewSize::new(320, 240));

    let sink = config.sink_config();
    assert_eq!(sink.sample_rate, 48_000);
    assert_eq!(sink.channels, 1);
}

#[test]
fn test_invalid_filter_is_rejected() {
    let result = CaptureConfig::from_toml(
        r#"
[usb]
filters = ["12345:0001"]
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = CaptureConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_rusb_options_follow_driver_settings() {
    let config = CaptureConfig::from_toml(
        r#"
[driver]
control_timeout_ms = 250
feature_unit_id = 5
"#,
    )
    .unwrap();

    let options = config.rusb_options().unwrap();
    assert_eq!(options.control_timeout.as_millis(), 250);
    assert_eq!(options.feature_unit_id, 5);
    assert!(options.filters.is_empty());
}
