//! Capture session coordination

mod acquisition;
pub mod manager;
pub mod worker;

pub use manager::{SessionManager, SessionSettings};
pub use worker::{SessionWorkerThread, spawn_session_worker};
