//! Channel bridge between the USB event thread, the session worker and the UI
//!
//! Hot-plug notifications are produced on the USB event thread, which must
//! never block on session work. They are queued to the dedicated session
//! worker together with user commands arriving from the Tokio runtime. Session
//! events flow back to the UI.

use crate::departures::DisconnectTracker;
use async_channel::{Receiver, Sender, TrySendError, bounded};
use tokio::sync::oneshot;
use tracing::warn;
use types::{AudioCapabilities, DeviceIdentity, PreviewSize, TeardownReason, ToggleOutcome};

/// Channel capacity for commands and events
pub const CHANNEL_CAPACITY: usize = 256;

/// Hot-plug notification delivered by the USB subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    /// Device physically attached
    Attached(DeviceIdentity),
    /// Device accessible (permission granted, node openable)
    Connected(DeviceIdentity),
    /// Device no longer accessible
    Disconnected(DeviceIdentity),
    /// Device physically removed
    Detached(DeviceIdentity),
}

impl HotplugEvent {
    pub fn identity(&self) -> &DeviceIdentity {
        match self {
            HotplugEvent::Attached(identity)
            | HotplugEvent::Connected(identity)
            | HotplugEvent::Disconnected(identity)
            | HotplugEvent::Detached(identity) => identity,
        }
    }
}

/// Commands consumed by the session worker
#[derive(Debug)]
pub enum SessionCommand {
    Hotplug(HotplugEvent),

    /// Start a session if idle, otherwise stop the active one
    Toggle {
        response: oneshot::Sender<ToggleOutcome>,
    },

    /// Tear down any session and stop the worker
    Shutdown,
}

/// Session changes reported to observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    DeviceAttached {
        identity: DeviceIdentity,
    },

    DeviceDetached {
        identity: DeviceIdentity,
    },

    SessionActive {
        identity: DeviceIdentity,
        /// Capability snapshot when an audio endpoint is streaming
        audio: Option<AudioCapabilities>,
        /// Negotiated preview size when a video endpoint was acquired
        preview: Option<PreviewSize>,
    },

    SessionIdle {
        identity: DeviceIdentity,
        reason: TeardownReason,
    },

    /// Acquisition rolled back; the session is idle
    AcquisitionFailed {
        identity: DeviceIdentity,
        reason: String,
    },

    /// Disconnect for a device that is not the active session
    StaleNotification {
        identity: DeviceIdentity,
    },
}

/// Handle for the Tokio runtime (async)
#[derive(Clone)]
pub struct SessionBridge {
    cmd_tx: Sender<SessionCommand>,
    event_rx: Receiver<SessionEvent>,
}

impl SessionBridge {
    /// Send a command to the session worker
    pub async fn send_command(&self, cmd: SessionCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Request a user toggle and wait for its outcome
    pub async fn toggle(&self) -> crate::Result<ToggleOutcome> {
        let (response, rx) = oneshot::channel();
        self.send_command(SessionCommand::Toggle { response }).await?;
        rx.await
            .map_err(|e| crate::Error::Channel(format!("toggle response dropped: {}", e)))
    }

    /// Receive the next session event
    pub async fn recv_event(&self) -> crate::Result<SessionEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without waiting
    pub fn try_recv_event(&self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Handle for the USB event thread (blocking)
///
/// Disconnects are recorded in the [`DisconnectTracker`] before they are
/// queued, so an acquisition in progress can observe them immediately.
#[derive(Clone)]
pub struct HotplugSender {
    cmd_tx: Sender<SessionCommand>,
    departures: DisconnectTracker,
}

impl HotplugSender {
    pub fn send(&self, event: HotplugEvent) -> crate::Result<()> {
        match &event {
            HotplugEvent::Connected(identity) => self.departures.mark_present(identity),
            HotplugEvent::Disconnected(identity) => self.departures.mark_departed(identity),
            HotplugEvent::Attached(_) | HotplugEvent::Detached(_) => {}
        }

        self.cmd_tx
            .send_blocking(SessionCommand::Hotplug(event))
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the session worker thread (blocking)
pub struct SessionWorkerChannel {
    cmd_rx: Receiver<SessionCommand>,
    notifier: EventNotifier,
    departures: DisconnectTracker,
}

impl SessionWorkerChannel {
    /// Receive the next command (blocking)
    pub fn recv_command(&self) -> crate::Result<SessionCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<SessionCommand> {
        self.cmd_rx.try_recv().ok()
    }

    pub fn notifier(&self) -> EventNotifier {
        self.notifier.clone()
    }

    pub fn departures(&self) -> DisconnectTracker {
        self.departures.clone()
    }
}

/// Publisher of [`SessionEvent`]s
///
/// Never blocks: when the observer falls behind, events are dropped with a
/// warning rather than stalling session transitions.
#[derive(Clone)]
pub struct EventNotifier {
    event_tx: Sender<SessionEvent>,
}

impl EventNotifier {
    pub fn new(event_tx: Sender<SessionEvent>) -> Self {
        Self { event_tx }
    }

    pub fn notify(&self, event: SessionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Session event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Create a standalone notifier and the receiving end of its queue
pub fn event_channel(capacity: usize) -> (EventNotifier, Receiver<SessionEvent>) {
    let (event_tx, event_rx) = bounded(capacity);
    (EventNotifier::new(event_tx), event_rx)
}

/// Create the channel bridge
///
/// Returns (SessionBridge for Tokio, HotplugSender for the USB event thread,
/// SessionWorkerChannel for the session worker)
pub fn create_session_bridge() -> (SessionBridge, HotplugSender, SessionWorkerChannel) {
    let (cmd_tx, cmd_rx) = bounded(CHANNEL_CAPACITY);
    let (notifier, event_rx) = event_channel(CHANNEL_CAPACITY);
    let departures = DisconnectTracker::new();

    (
        SessionBridge {
            cmd_tx: cmd_tx.clone(),
            event_rx,
        },
        HotplugSender {
            cmd_tx,
            departures: departures.clone(),
        },
        SessionWorkerChannel {
            cmd_rx,
            notifier,
            departures,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_mock_identity;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, _hotplug, worker) = create_session_bridge();

        let handle = std::thread::spawn(move || {
            let cmd = worker.recv_command().unwrap();
            matches!(cmd, SessionCommand::Shutdown)
        });

        bridge.send_command(SessionCommand::Shutdown).await.unwrap();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_disconnect_marks_departure_before_queueing() {
        let (_bridge, hotplug, worker) = create_session_bridge();
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");

        hotplug
            .send(HotplugEvent::Disconnected(identity.clone()))
            .unwrap();
        assert!(worker.departures().has_departed(&identity));

        hotplug
            .send(HotplugEvent::Connected(identity.clone()))
            .unwrap();
        assert!(!worker.departures().has_departed(&identity));
    }

    #[test]
    fn test_notifier_drops_when_full() {
        let (notifier, rx) = event_channel(1);
        let identity = create_mock_identity(0x1234, 0x5678, "SN1");

        notifier.notify(SessionEvent::DeviceAttached {
            identity: identity.clone(),
        });
        notifier.notify(SessionEvent::DeviceDetached { identity });

        assert_eq!(rx.len(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(SessionEvent::DeviceAttached { .. })
        ));
    }
}
