//! Session worker thread
//!
//! Dedicated thread that owns every session transition. Hot-plug events from
//! the USB event thread and user commands from the Tokio runtime are queued to
//! it, so acquisition and teardown never run on the USB event thread and
//! never interleave.

use super::manager::SessionManager;
use common::{DeviceSelector, SessionCommand, SessionWorkerChannel};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Session worker thread
pub struct SessionWorkerThread {
    manager: Arc<SessionManager>,
    channel: SessionWorkerChannel,
    /// Device picker for user toggles
    selector: Box<dyn DeviceSelector>,
}

impl SessionWorkerThread {
    pub fn new(
        manager: Arc<SessionManager>,
        channel: SessionWorkerChannel,
        selector: Box<dyn DeviceSelector>,
    ) -> Self {
        Self {
            manager,
            channel,
            selector,
        }
    }

    /// Process commands until `Shutdown` or until every sender is gone
    ///
    /// The session is torn down on the way out either way.
    pub fn run(self) {
        info!("Session worker started");

        loop {
            match self.channel.recv_command() {
                Ok(SessionCommand::Shutdown) => {
                    info!("Session worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    break;
                }
            }
        }

        self.manager.shutdown();
        info!("Session worker stopped");
    }

    fn handle_command(&self, cmd: SessionCommand) {
        // A panicking transition must not take the worker down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in session command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Hotplug(event) => {
                debug!("Hot-plug event: {:?}", event);
                self.manager.handle_hotplug(event);
            }

            SessionCommand::Toggle { response } => {
                let outcome = self.manager.user_toggle(self.selector.as_ref());
                debug!("Toggle outcome: {:?}", outcome);
                let _ = response.send(outcome);
            }

            // Handled in the run loop
            SessionCommand::Shutdown => {}
        }
    }
}

/// Spawn the session worker thread
pub fn spawn_session_worker(
    manager: Arc<SessionManager>,
    channel: SessionWorkerChannel,
    selector: Box<dyn DeviceSelector>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("session-worker".to_string())
        .spawn(move || SessionWorkerThread::new(manager, channel, selector).run())
}
