//! Core orchestrator for the live broadcaster.
//!
//! This crate coordinates capture, audio, encoding and transport
//! subsystems behind a single [`Engine`]. Hosts either call the engine
//! directly or run it on its own thread with [`spawn_engine`] and talk to it
//! through [`EngineCommand`]s and [`EngineEvent`]s.

mod chat;
mod config;
mod error;
mod metrics;
mod monitor;
mod orchestrator;
mod outbound;
mod recording;
mod session;
mod state;
mod talkback;
pub mod telemetry;

pub use chat::ChatRelay;
pub use config::EngineConfig;
pub use error::EngineError;
pub use metrics::MetricsCollector;
pub use orchestrator::{Engine, EngineDevices};
pub use recording::{recording_path, RecordingWriter, RECORDING_MAGIC};
pub use session::SessionSettings;
pub use talkback::{RequestOutcome, TalkbackChannel};

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, warn};

use livecast_ipc::{CaptureConfig, EngineCommand, EngineEvent};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Deliver an event without blocking the caller.
pub(crate) fn send_event(events: &Sender<EngineEvent>, event: EngineEvent) {
    if let Err(e) = events.try_send(event) {
        warn!("Failed to send event: {}", e);
    }
}

/// An engine running on its own thread.
///
/// Dropping the handle shuts the engine down and joins its thread.
pub struct EngineHandle {
    commands: Sender<EngineCommand>,
    events: Receiver<EngineEvent>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn commands(&self) -> &Sender<EngineCommand> {
        &self.commands
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// Queue a command. Fails once the engine thread has exited.
    pub fn send(&self, command: EngineCommand) -> EngineResult<()> {
        self.commands
            .send(command)
            .map_err(|e| EngineError::Thread(format!("engine stopped: {}", e)))
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let _ = self.commands.try_send(EngineCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Engine thread panicked");
            }
        }
    }
}

/// Create an engine and serve commands on a dedicated thread.
///
/// The engine is built on the calling thread so configuration and device
/// errors are returned here rather than as events.
pub fn spawn_engine(
    config: EngineConfig,
    capture_config: CaptureConfig,
    devices: EngineDevices,
) -> EngineResult<EngineHandle> {
    let (commands, command_rx) = livecast_ipc::command_channel();
    let (event_tx, events) = livecast_ipc::event_channel();
    let mut engine = Engine::new(config, capture_config, devices, event_tx)?;

    let thread = thread::Builder::new()
        .name("livecast-engine".into())
        .spawn(move || engine.run(&command_rx))
        .map_err(|e| EngineError::Thread(e.to_string()))?;

    Ok(EngineHandle {
        commands,
        events,
        thread: Some(thread),
    })
}
