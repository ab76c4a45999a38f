//! Device identity captured from hot-plug control blocks

use serde::{Deserialize, Serialize};
use std::fmt;

/// USB filesystem root used when a device path cannot be decomposed
pub const DEFAULT_USBFS_ROOT: &str = "/dev/bus/usb";

/// Raw snapshot handed over by the hot-plug collaborator
///
/// This is the control block as reported at connect time. It may be released
/// or reused by the collaborator afterwards, so the session never keeps it:
/// a [`DeviceIdentity`] is derived from it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlBlock {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Serial number string (if the device reports one)
    pub serial: Option<String>,
    /// Bus number (0 if unknown)
    pub bus_number: u8,
    /// Device address on the bus (0 if unknown)
    pub device_address: u8,
    /// File descriptor granted by the platform (Android hands these out)
    pub file_descriptor: Option<i32>,
    /// Device node path, e.g. `/dev/bus/usb/001/004`
    pub device_path: String,
}

/// Immutable identity of one physical USB device
///
/// Created once per connect notification and deep-copied wherever it is
/// needed; nothing in it refers back to the originating control block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: String,
    pub bus_number: u8,
    pub device_address: u8,
    pub file_descriptor: Option<i32>,
    pub device_path: String,
    /// USB filesystem root derived from `device_path`
    pub usbfs_path: String,
}

/// The part of an identity that decides whether two notifications refer to
/// the same device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: String,
    pub bus_number: u8,
    pub device_address: u8,
}

impl DeviceIdentity {
    /// Build an identity from a control block snapshot
    ///
    /// Bus number and device address missing from the block (reported as 0)
    /// are recovered from the last two segments of the device path when those
    /// are numeric.
    pub fn from_control_block(block: &ControlBlock, default_root: &str) -> Self {
        let (path_bus, path_address) = bus_and_address_from_path(&block.device_path);

        let bus_number = if block.bus_number == 0 {
            path_bus.unwrap_or(0)
        } else {
            block.bus_number
        };
        let device_address = if block.device_address == 0 {
            path_address.unwrap_or(0)
        } else {
            block.device_address
        };

        Self {
            vendor_id: block.vendor_id,
            product_id: block.product_id,
            serial: block.serial.clone().unwrap_or_default(),
            bus_number,
            device_address,
            file_descriptor: block.file_descriptor,
            device_path: block.device_path.clone(),
            usbfs_path: usbfs_root(&block.device_path, default_root),
        }
    }

    /// Key used for identity matching
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial: self.serial.clone(),
            bus_number: self.bus_number,
            device_address: self.device_address,
        }
    }

    /// Whether `other` refers to the same physical device
    ///
    /// File descriptors and paths are ignored: the platform may hand out a
    /// new descriptor for the same device.
    pub fn same_device(&self, other: &DeviceIdentity) -> bool {
        self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.serial == other.serial
            && self.bus_number == other.bus_number
            && self.device_address == other.device_address
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {:03} addr {:03}",
            self.vendor_id, self.product_id, self.bus_number, self.device_address
        )?;
        if !self.serial.is_empty() {
            write!(f, ", serial {}", self.serial)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}@{}.{}",
            self.vendor_id, self.product_id, self.bus_number, self.device_address
        )
    }
}

/// Derive the USB filesystem root from a device node path
///
/// `/dev/bus/usb/001/004` yields `/dev/bus/usb`: the last two segments (bus
/// and device number) are dropped. Paths with fewer than three segments fall
/// back to `default_root`.
pub fn usbfs_root(device_path: &str, default_root: &str) -> String {
    let trimmed = device_path.trim_end_matches('/');
    let segments: Vec<&str> = trimmed.split('/').collect();

    if segments.len() > 2 {
        let root = segments[..segments.len() - 2].join("/");
        if !root.is_empty() {
            return root;
        }
    }

    default_root.to_string()
}

fn bus_and_address_from_path(device_path: &str) -> (Option<u8>, Option<u8>) {
    let mut segments = device_path.trim_end_matches('/').rsplit('/');
    let address = segments.next().and_then(|s| s.parse::<u8>().ok());
    let bus = segments.next().and_then(|s| s.parse::<u8>().ok());
    (bus, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(path: &str) -> ControlBlock {
        ControlBlock {
            vendor_id: 0x1234,
            product_id: 0x5678,
            serial: Some("SN1".to_string()),
            bus_number: 0,
            device_address: 0,
            file_descriptor: Some(42),
            device_path: path.to_string(),
        }
    }

    #[test]
    fn test_usbfs_root_from_linux_path() {
        assert_eq!(
            usbfs_root("/dev/bus/usb/001/004", DEFAULT_USBFS_ROOT),
            "/dev/bus/usb"
        );
        assert_eq!(usbfs_root("/proc/bus/usb/002/010/", "/x"), "/proc/bus/usb");
    }

    #[test]
    fn test_usbfs_root_falls_back_on_short_paths() {
        assert_eq!(usbfs_root("", DEFAULT_USBFS_ROOT), DEFAULT_USBFS_ROOT);
        assert_eq!(usbfs_root("004", DEFAULT_USBFS_ROOT), DEFAULT_USBFS_ROOT);
        assert_eq!(usbfs_root("001/004", DEFAULT_USBFS_ROOT), DEFAULT_USBFS_ROOT);
        // Three segments whose prefix is empty still falls back
        assert_eq!(usbfs_root("/001/004", DEFAULT_USBFS_ROOT), DEFAULT_USBFS_ROOT);
    }

    #[test]
    fn test_bus_and_address_recovered_from_path() {
        let identity = DeviceIdentity::from_control_block(
            &block("/dev/bus/usb/003/017"),
            DEFAULT_USBFS_ROOT,
        );
        assert_eq!(identity.bus_number, 3);
        assert_eq!(identity.device_address, 17);
        assert_eq!(identity.serial, "SN1");
        assert_eq!(identity.file_descriptor, Some(42));
    }

    #[test]
    fn test_explicit_bus_and_address_win() {
        let mut b = block("/dev/bus/usb/003/017");
        b.bus_number = 1;
        b.device_address = 2;
        let identity = DeviceIdentity::from_control_block(&b, DEFAULT_USBFS_ROOT);
        assert_eq!(identity.bus_number, 1);
        assert_eq!(identity.device_address, 2);
    }

    #[test]
    fn test_identity_survives_control_block_mutation() {
        let mut b = block("/dev/bus/usb/001/004");
        let identity = DeviceIdentity::from_control_block(&b, DEFAULT_USBFS_ROOT);
        b.serial = None;
        b.device_path.clear();
        assert_eq!(identity.serial, "SN1");
        assert_eq!(identity.device_path, "/dev/bus/usb/001/004");
    }

    #[test]
    fn test_same_device_ignores_descriptor_and_path() {
        let a = DeviceIdentity::from_control_block(&block("/dev/bus/usb/001/004"), "/r");
        let mut b = a.clone();
        b.file_descriptor = Some(7);
        b.device_path = "/other".to_string();
        assert!(a.same_device(&b));
        assert_eq!(a.key(), b.key());

        b.serial = "SN2".to_string();
        assert!(!a.same_device(&b));
    }

    #[test]
    fn test_display() {
        let identity =
            DeviceIdentity::from_control_block(&block("/dev/bus/usb/001/004"), "/r");
        assert_eq!(
            identity.to_string(),
            "1234:5678 (bus 001 addr 004, serial SN1)"
        );
    }
}
