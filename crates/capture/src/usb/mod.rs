//! rusb backend
//!
//! Hot-plug monitoring on a dedicated `usb-events` thread and the native
//! UAC driver used by the session core.

pub mod filter;
pub mod monitor;
pub mod native;

pub use filter::{DeviceFilter, FilterError, FilterSelector, matches_any};
pub use monitor::{MonitorHandle, MonitorSettings, UsbMonitor};
pub use native::{RusbDriver, RusbOptions};

use rusb::{Device, UsbContext};
use tracing::trace;
use types::{ControlBlock, DeviceIdentity, DriverError};

/// Build the identity of a device as the hot-plug collaborator would
///
/// The second value reports whether the device node could be opened, which
/// is what distinguishes "connected" from merely "attached".
pub fn describe_device<T: UsbContext>(
    device: &Device<T>,
    usbfs_root: &str,
) -> Result<(DeviceIdentity, bool), rusb::Error> {
    let descriptor = device.device_descriptor()?;
    let bus_number = device.bus_number();
    let device_address = device.address();

    let (serial, accessible) = match device.open() {
        Ok(handle) => {
            let serial = descriptor
                .serial_number_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
            (serial, true)
        }
        Err(e) => {
            trace!(
                "Device {:03}/{:03} not accessible: {}",
                bus_number, device_address, e
            );
            (None, false)
        }
    };

    let block = ControlBlock {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        serial,
        bus_number,
        device_address,
        file_descriptor: None,
        device_path: format!(
            "{}/{:03}/{:03}",
            usbfs_root.trim_end_matches('/'),
            bus_number,
            device_address
        ),
    };

    Ok((
        DeviceIdentity::from_control_block(&block, usbfs_root),
        accessible,
    ))
}

/// Convert rusb errors to driver errors
pub fn map_rusb_error(err: rusb::Error) -> DriverError {
    match err {
        rusb::Error::NoDevice => DriverError::NoDevice,
        rusb::Error::Timeout => DriverError::Timeout,
        rusb::Error::NotSupported => DriverError::Unsupported("operation not supported by device"),
        _ => DriverError::Usb(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), DriverError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Timeout), DriverError::Timeout);
        assert!(matches!(
            map_rusb_error(rusb::Error::NotSupported),
            DriverError::Unsupported(_)
        ));
        assert!(matches!(
            map_rusb_error(rusb::Error::Pipe),
            DriverError::Usb(_)
        ));
    }
}
