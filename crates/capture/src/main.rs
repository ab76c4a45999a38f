//! usb-capture
//!
//! Capture daemon for hot-pluggable USB audio/video devices. Plugging in a
//! matching device starts a session: audio is streamed to the system output
//! and the session is released again when the device goes away.

use anyhow::{Context, Result, anyhow};
use capture::config::CaptureConfig;
use capture::session::{SessionManager, spawn_session_worker};
use capture::usb::{DeviceFilter, FilterSelector, MonitorSettings, RusbDriver, UsbMonitor};
use clap::Parser;
use common::{
    NativeDriver, SessionBridge, SessionCommand, SessionEvent, create_session_bridge,
    setup_logging,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use types::ToggleOutcome;

#[derive(Parser, Debug)]
#[command(name = "usb-capture")]
#[command(
    author,
    version,
    about = "USB capture daemon - stream hot-plugged USB audio/video devices"
)]
#[command(long_about = "
Watches for USB Audio Class / USB Video Class capture devices and starts a
capture session as soon as a matching device becomes accessible. Audio is
down-mixed when needed and played through the system output.

EXAMPLES:
    # Run with default config
    usb-capture

    # Only capture from one device
    usb-capture --device 0d8c:0014

    # List capture candidates as JSON
    usb-capture --list-devices --json

INTERACTIVE COMMANDS (stdin):
    t           Toggle the session
    v <N>       Set volume
    m           Toggle mute
    r <RATE>    Set device sample rate
    s           Show session status
    q           Quit

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-capture/capture.toml
    3. /etc/usb-capture/capture.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the device list as JSON
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// Device picked by the toggle command (VID:PID, `*` as wildcard)
    #[arg(short, long, value_name = "VID:PID")]
    device: Option<DeviceFilter>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CaptureConfig::default();
        let path = CaptureConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CaptureConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CaptureConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-capture v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let driver = RusbDriver::new(config.rusb_options()?).context("Failed to initialize USB")?;

    if args.list_devices {
        return list_devices_mode(&driver, args.json);
    }

    let sink = capture::audio::build_sink(config.sink_config())?;
    let (bridge, hotplug, channel) = create_session_bridge();

    let manager = Arc::new(SessionManager::new(
        Arc::new(driver),
        sink,
        channel.notifier(),
        channel.departures(),
        config.session_settings(),
    ));

    let selector = match args.device {
        Some(filter) => FilterSelector::new(vec![filter]),
        None => FilterSelector::new(config.device_filters()?),
    };
    let worker_handle = spawn_session_worker(manager.clone(), channel, Box::new(selector))
        .context("Failed to spawn session worker")?;

    let monitor = UsbMonitor::spawn(
        hotplug,
        MonitorSettings {
            filters: config.device_filters()?,
            usbfs_root: config.usbfs_root(),
            enumerate_on_start: config.usb.enumerate_on_start,
        },
    )
    .context("Failed to spawn USB event thread")?;

    let result = run_interactive(&bridge, &manager).await;

    info!("Shutting down...");
    if let Err(e) = bridge.send_command(SessionCommand::Shutdown).await {
        error!("Error shutting down session worker: {:#}", e);
    }
    if worker_handle.join().is_err() {
        error!("Session worker thread panicked");
    }
    monitor.shutdown();

    result
}

/// List capture candidates and exit
fn list_devices_mode(driver: &RusbDriver, json: bool) -> Result<()> {
    let devices = driver.enumerate().map_err(|e| anyhow!("{}", e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in &devices {
        let audio = driver.find_audio(device);
        println!(
            "  {:04x}:{:04x}  Bus {:03} Device {:03}  {}",
            device.vendor_id,
            device.product_id,
            device.bus_number,
            device.device_address,
            if audio.is_some() { "audio" } else { "-" }
        );
        if !device.serial.is_empty() {
            println!("      Serial: {}", device.serial);
        }
        if let Some(audio) = audio {
            println!(
                "      {} ch, {} bit, rates {}",
                audio.channel_count(),
                audio.bit_resolution(),
                audio.supported_sample_rates()
            );
        }
        println!();
    }

    Ok(())
}

/// Print session events and run stdin commands until quit or Ctrl+C
async fn run_interactive(bridge: &SessionBridge, manager: &Arc<SessionManager>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if !handle_line(line.trim(), bridge, manager).await? {
                            break;
                        }
                    }
                    None => stdin_open = false,
                }
            }
            event = bridge.recv_event() => {
                match event {
                    Ok(event) => print_event(&event),
                    Err(e) => {
                        warn!("Session event channel closed: {}", e);
                        break;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
        }
    }

    Ok(())
}

/// Run one interactive command; returns false on quit
async fn handle_line(
    line: &str,
    bridge: &SessionBridge,
    manager: &Arc<SessionManager>,
) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(true);
    };
    let argument = parts.next();

    match command {
        "q" | "quit" => return Ok(false),
        "t" | "toggle" => match bridge.toggle().await? {
            ToggleOutcome::Started(identity) => println!("Session started on {}", identity),
            ToggleOutcome::Stopped => println!("Session stopped"),
            ToggleOutcome::NoDevice => println!("No matching device"),
            ToggleOutcome::Failed(reason) => println!("Failed to start session: {}", reason),
        },
        "v" | "volume" => match argument.map(str::parse::<i32>) {
            Some(Ok(volume)) => {
                let manager = manager.clone();
                match tokio::task::spawn_blocking(move || manager.set_volume(volume)).await? {
                    Ok(applied) => println!("Volume: {}", applied),
                    Err(e) => println!("Volume not set: {}", e),
                }
            }
            _ => println!("Usage: v <volume>"),
        },
        "m" | "mute" => {
            let manager = manager.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mute = !manager.is_mute()?;
                manager.set_mute(mute).map(|()| mute)
            })
            .await?;
            match result {
                Ok(mute) => println!("Mute: {}", if mute { "on" } else { "off" }),
                Err(e) => println!("Mute not changed: {}", e),
            }
        }
        "r" | "rate" => match argument.map(str::parse::<u32>) {
            Some(Ok(rate)) => {
                let manager = manager.clone();
                match tokio::task::spawn_blocking(move || manager.set_sample_rate(rate)).await? {
                    Ok(()) => println!("Sample rate: {} Hz", rate),
                    Err(e) => println!("Sample rate not set: {}", e),
                }
            }
            _ => println!("Usage: r <rate>"),
        },
        "s" | "status" => {
            let manager = manager.clone();
            tokio::task::spawn_blocking(move || print_status(&manager)).await?;
        }
        other => println!("Unknown command: {}", other),
    }

    Ok(true)
}

fn print_status(manager: &SessionManager) {
    println!("State: {}", manager.state());
    let Some(identity) = manager.active_identity() else {
        return;
    };
    println!("Device: {}", identity);

    if let Some(caps) = manager.audio_capabilities() {
        println!(
            "Audio: {} Hz, {} ch, {} bit, volume {} [{}..{}], mute {}",
            caps.sample_rate,
            caps.channel_count,
            caps.bit_resolution,
            caps.volume,
            caps.min_volume,
            caps.max_volume,
            caps.mute
        );
    }
    if let Some(stats) = manager.metrics() {
        println!(
            "Stream: {} captured, {} played, {} frames at {}, up {}",
            common::metrics::format_bytes(stats.bytes_captured),
            common::metrics::format_bytes(stats.bytes_played),
            stats.frames_delivered,
            stats.format_capture_rate(),
            stats.format_uptime()
        );
        if stats.short_writes > 0 || stats.sink_errors > 0 {
            println!(
                "  {} short writes ({:.1}%), {} sink errors, {} frames dropped",
                stats.short_writes,
                stats.short_write_rate() * 100.0,
                stats.sink_errors,
                stats.frames_dropped
            );
        }
    }
    match manager.preview_size() {
        Some(size) if manager.is_previewing() => println!("Preview: {}", size),
        Some(size) => println!("Preview: {} (waiting for surface)", size),
        None => {}
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::DeviceAttached { identity } => println!("Attached: {}", identity),
        SessionEvent::DeviceDetached { identity } => println!("Detached: {}", identity),
        SessionEvent::SessionActive {
            identity,
            audio,
            preview,
        } => {
            println!("Session active: {}", identity);
            if let Some(caps) = audio {
                println!(
                    "  audio {} Hz, {} ch, {} bit",
                    caps.sample_rate, caps.channel_count, caps.bit_resolution
                );
            }
            if let Some(size) = preview {
                println!("  preview {}", size);
            }
        }
        SessionEvent::SessionIdle { identity, reason } => {
            println!("Session ended: {} ({})", identity, reason)
        }
        SessionEvent::AcquisitionFailed { identity, reason } => {
            println!("Failed to start session on {}: {}", identity, reason)
        }
        SessionEvent::StaleNotification { .. } => {}
    }
}
