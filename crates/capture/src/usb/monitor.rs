//! Hot-plug monitor thread
//!
//! Owns the rusb context used for hot-plug registration and runs the
//! `handle_events()` loop on a dedicated `usb-events` thread. Callbacks only
//! queue the device; descriptors are read after `handle_events()` returns,
//! because libusb forbids synchronous I/O inside a hot-plug callback.
//! Notifications are then forwarded to the session worker through the
//! [`HotplugSender`], which never waits on session work.

use super::describe_device;
use super::filter::{DeviceFilter, matches_any};
use common::{HotplugEvent, HotplugSender};
use parking_lot::Mutex;
use rusb::{Context, Device, Hotplug, HotplugBuilder, UsbContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use types::DeviceIdentity;

/// How long one `handle_events()` call may block before the stop flag is
/// checked again
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub filters: Vec<DeviceFilter>,
    pub usbfs_root: String,
    /// Report devices present at startup as arrivals
    pub enumerate_on_start: bool,
}

enum PendingHotplug {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

/// Hot-plug callback handler
///
/// Runs inside libusb; only records what happened.
struct HotplugCallback {
    pending: Arc<Mutex<Vec<PendingHotplug>>>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.pending.lock().push(PendingHotplug::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.pending.lock().push(PendingHotplug::Left {
            bus: device.bus_number(),
            address: device.address(),
        });
    }
}

struct KnownDevice {
    identity: DeviceIdentity,
    connected: bool,
}

/// USB hot-plug monitor
pub struct UsbMonitor {
    context: Context,
    settings: MonitorSettings,
    sender: HotplugSender,
    pending: Arc<Mutex<Vec<PendingHotplug>>>,
    /// Devices reported so far, keyed by (bus, address)
    known: HashMap<(u8, u8), KnownDevice>,
}

impl UsbMonitor {
    pub fn new(sender: HotplugSender, settings: MonitorSettings) -> Result<Self, rusb::Error> {
        if !rusb::has_hotplug() {
            warn!("libusb reports no hot-plug support on this platform");
            return Err(rusb::Error::NotSupported);
        }

        Ok(Self {
            context: Context::new()?,
            settings,
            sender,
            pending: Arc::new(Mutex::new(Vec::new())),
            known: HashMap::new(),
        })
    }

    /// Spawn the monitor on the `usb-events` thread
    pub fn spawn(
        sender: HotplugSender,
        settings: MonitorSettings,
    ) -> std::io::Result<MonitorHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let thread = std::thread::Builder::new()
            .name("usb-events".to_string())
            .spawn(move || {
                let monitor = UsbMonitor::new(sender, settings)?;
                monitor.run(&thread_stop)
            })?;

        Ok(MonitorHandle {
            stop,
            thread: Some(thread),
        })
    }

    /// Run the event loop until `stop` is set
    pub fn run(mut self, stop: &AtomicBool) -> Result<(), rusb::Error> {
        let callback = HotplugCallback {
            pending: self.pending.clone(),
        };
        let _registration = HotplugBuilder::new()
            .enumerate(self.settings.enumerate_on_start)
            .register(&self.context, Box::new(callback))?;

        info!("USB monitor started");

        while !stop.load(Ordering::Acquire) {
            match self.context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(EVENT_POLL_INTERVAL);
                }
            }

            let pending = std::mem::take(&mut *self.pending.lock());
            for event in pending {
                match event {
                    PendingHotplug::Arrived(device) => self.handle_arrival(&device),
                    PendingHotplug::Left { bus, address } => self.handle_departure(bus, address),
                }
            }
        }

        info!("USB monitor stopped");
        Ok(())
    }

    fn handle_arrival(&mut self, device: &Device<Context>) {
        let key = (device.bus_number(), device.address());

        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to read descriptor of {:?}: {}", key, e);
                return;
            }
        };

        // Root hubs (Linux Foundation, hub class) never carry capture endpoints
        if descriptor.vendor_id() == 0x1d6b && descriptor.class_code() == 9 {
            debug!("Skipping root hub: bus={}, addr={}", key.0, key.1);
            return;
        }

        if !matches_any(
            &self.settings.filters,
            descriptor.vendor_id(),
            descriptor.product_id(),
        ) {
            debug!(
                "Device ignored by filter: bus={}, addr={}, vid={:#x}, pid={:#x}",
                key.0,
                key.1,
                descriptor.vendor_id(),
                descriptor.product_id()
            );
            return;
        }

        let (identity, accessible) = match describe_device(device, &self.settings.usbfs_root) {
            Ok(described) => described,
            Err(e) => {
                warn!("Failed to describe device {:?}: {}", key, e);
                return;
            }
        };

        self.forward(HotplugEvent::Attached(identity.clone()));
        if accessible {
            self.forward(HotplugEvent::Connected(identity.clone()));
        } else {
            info!("Device {} attached but not accessible", identity);
        }

        self.known.insert(
            key,
            KnownDevice {
                identity,
                connected: accessible,
            },
        );
    }

    fn handle_departure(&mut self, bus: u8, address: u8) {
        let Some(known) = self.known.remove(&(bus, address)) else {
            debug!("Departure of untracked device bus={}, addr={}", bus, address);
            return;
        };

        if known.connected {
            self.forward(HotplugEvent::Disconnected(known.identity.clone()));
        }
        self.forward(HotplugEvent::Detached(known.identity));
    }

    fn forward(&self, event: HotplugEvent) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to forward hot-plug event: {}", e);
        }
    }
}

/// Handle to a running monitor thread
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), rusb::Error>>>,
}

impl MonitorHandle {
    /// Stop the event loop and wait for the thread to exit
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("USB monitor exited with error: {}", e),
                Err(e) => error!("USB monitor thread panicked: {:?}", e),
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_session_bridge;

    #[test]
    fn test_monitor_creation() {
        let (_bridge, hotplug, _worker) = create_session_bridge();
        let settings = MonitorSettings {
            filters: Vec::new(),
            usbfs_root: types::DEFAULT_USBFS_ROOT.to_string(),
            enumerate_on_start: false,
        };

        // Context creation may fail without USB access
        match UsbMonitor::new(hotplug, settings) {
            Ok(monitor) => assert!(monitor.known.is_empty()),
            Err(e) => eprintln!("USB monitor creation failed (expected without USB): {}", e),
        }
    }

    #[test]
    fn test_departure_of_unknown_device_is_ignored() {
        let (_bridge, hotplug, worker) = create_session_bridge();
        let settings = MonitorSettings {
            filters: Vec::new(),
            usbfs_root: types::DEFAULT_USBFS_ROOT.to_string(),
            enumerate_on_start: false,
        };

        if let Ok(mut monitor) = UsbMonitor::new(hotplug, settings) {
            monitor.handle_departure(1, 4);
            assert!(worker.try_recv_command().is_none());
        }
    }
}
