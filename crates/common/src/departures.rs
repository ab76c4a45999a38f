//! Disconnect tracking shared between the USB event thread and the session worker
//!
//! The event thread records a departure before it queues the disconnect
//! notification, so a worker that is still acquiring the same device can see
//! the disconnect without waiting for the queued event.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use types::{DeviceIdentity, DeviceKey};

/// Set of devices whose disconnect has been observed by the event thread
#[derive(Debug, Clone, Default)]
pub struct DisconnectTracker {
    departed: Arc<Mutex<HashSet<DeviceKey>>>,
}

impl DisconnectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the device disconnected
    pub fn mark_departed(&self, identity: &DeviceIdentity) {
        self.departed.lock().insert(identity.key());
    }

    /// Record that the device (re)connected
    pub fn mark_present(&self, identity: &DeviceIdentity) {
        self.departed.lock().remove(&identity.key());
    }

    /// Forget the departure once its disconnect notification has been handled
    pub fn clear(&self, identity: &DeviceIdentity) {
        self.departed.lock().remove(&identity.key());
    }

    /// Whether a disconnect for this device has been observed since its last connect
    pub fn has_departed(&self, identity: &DeviceIdentity) -> bool {
        self.departed.lock().contains(&identity.key())
    }

    pub fn len(&self) -> usize {
        self.departed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.departed.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_mock_identity;

    #[test]
    fn test_departure_round_trip() {
        let tracker = DisconnectTracker::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");

        assert!(!tracker.has_departed(&identity));
        tracker.mark_departed(&identity);
        assert!(tracker.has_departed(&identity));

        tracker.mark_present(&identity);
        assert!(!tracker.has_departed(&identity));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cleared_departure_does_not_linger() {
        let tracker = DisconnectTracker::new();

        for address in 1..=100 {
            let identity = crate::test_utils::create_mock_identity_at(
                0x1234, 0x5678, "SN1", 1, address,
            );
            tracker.mark_departed(&identity);
            assert!(tracker.has_departed(&identity));
            tracker.clear(&identity);
            assert!(!tracker.has_departed(&identity));
        }

        assert!(tracker.is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = DisconnectTracker::new();
        let other = tracker.clone();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");

        other.mark_departed(&identity);
        assert!(tracker.has_departed(&identity));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_new_descriptor_same_device() {
        let tracker = DisconnectTracker::new();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");
        let mut reopened = identity.clone();
        reopened.file_descriptor = Some(99);

        tracker.mark_departed(&identity);
        assert!(tracker.has_departed(&reopened));
    }
}
