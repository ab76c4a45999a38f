//! Session Bridge Integration Tests
//!
//! Tests for the channel bridge between the USB event thread, the session
//! worker and the Tokio runtime.
//!
//! Run with: `cargo test -p common --test bridge_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_mock_identity, create_mock_identity_at, with_timeout};
use common::{HotplugEvent, SessionCommand, SessionEvent, create_session_bridge};
use std::thread;
use types::{TeardownReason, ToggleOutcome};

// ============================================================================
// Command Flow Tests
// ============================================================================

#[tokio::test]
async fn test_toggle_round_trip() {
    let (bridge, _hotplug, worker) = create_session_bridge();
    let identity = create_mock_identity(0x1234, 0x5678, "SN1");
    let expected = identity.clone();

    let handle = thread::spawn(move || {
        match worker.recv_command().expect("Failed to receive command") {
            SessionCommand::Toggle { response } => {
                response
                    .send(ToggleOutcome::Started(expected))
                    .expect("Failed to send outcome");
                true
            }
            _ => false,
        }
    });

    let outcome = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.toggle())
        .await
        .expect("Toggle timed out")
        .expect("Toggle failed");
    assert_eq!(outcome, ToggleOutcome::Started(identity));

    assert!(handle.join().unwrap());
}

#[tokio::test]
async fn test_toggle_fails_when_worker_drops_response() {
    let (bridge, _hotplug, worker) = create_session_bridge();

    let handle = thread::spawn(move || {
        let cmd = worker.recv_command().expect("Failed to receive command");
        drop(cmd);
    });

    let result = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.toggle())
        .await
        .expect("Toggle timed out");
    assert!(result.is_err());

    handle.join().unwrap();
}

#[test]
fn test_hotplug_events_preserve_order() {
    let (_bridge, hotplug, worker) = create_session_bridge();
    let a = create_mock_identity_at(0x1234, 0x5678, "A", 1, 4);
    let b = create_mock_identity_at(0x1234, 0x5678, "B", 1, 5);

    let producer = {
        let hotplug = hotplug.clone();
        let a = a.clone();
        let b = b.clone();
        thread::spawn(move || {
            hotplug.send(HotplugEvent::Attached(a.clone())).unwrap();
            hotplug.send(HotplugEvent::Connected(a.clone())).unwrap();
            hotplug.send(HotplugEvent::Connected(b)).unwrap();
            hotplug.send(HotplugEvent::Disconnected(a)).unwrap();
        })
    };
    producer.join().unwrap();

    let mut received = Vec::new();
    while let Some(SessionCommand::Hotplug(event)) = worker.try_recv_command() {
        received.push(event);
    }

    assert_eq!(
        received,
        vec![
            HotplugEvent::Attached(a.clone()),
            HotplugEvent::Connected(a.clone()),
            HotplugEvent::Connected(b.clone()),
            HotplugEvent::Disconnected(a.clone()),
        ]
    );
    assert!(worker.departures().has_departed(&a));
    assert!(!worker.departures().has_departed(&b));
}

#[test]
fn test_hotplug_send_fails_after_worker_dropped() {
    let (_bridge, hotplug, worker) = create_session_bridge();
    drop(worker);
    drop(_bridge);

    let identity = create_mock_identity(0x1234, 0x5678, "SN1");
    assert!(hotplug.send(HotplugEvent::Attached(identity)).is_err());
}

// ============================================================================
// Event Flow Tests
// ============================================================================

#[tokio::test]
async fn test_worker_events_reach_bridge() {
    let (bridge, _hotplug, worker) = create_session_bridge();
    let identity = create_mock_identity(0x1234, 0x5678, "SN1");
    let notifier = worker.notifier();
    let sent = identity.clone();

    thread::spawn(move || {
        notifier.notify(SessionEvent::SessionActive {
            identity: sent.clone(),
            audio: None,
            preview: None,
        });
        notifier.notify(SessionEvent::SessionIdle {
            identity: sent,
            reason: TeardownReason::Disconnected,
        });
    })
    .join()
    .unwrap();

    let first = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_event())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, SessionEvent::SessionActive { identity: ref i, .. } if *i == identity));

    let second = bridge.try_recv_event();
    assert!(matches!(
        second,
        Some(SessionEvent::SessionIdle {
            reason: TeardownReason::Disconnected,
            ..
        })
    ));
    assert!(bridge.try_recv_event().is_none());
}
