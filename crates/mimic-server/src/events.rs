//! Notifications the engine consumes from the rest of the application.

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The environment is gone: stop it and discard its request log.
    EnvironmentDeleted(String),
    /// The environment was edited; the engine checks whether a restart is
    /// needed for the change to take effect.
    EnvironmentUpdated(String),
}

/// Create an event bus with room for `capacity` pending events per receiver.
pub fn event_bus(capacity: usize) -> (broadcast::Sender<EngineEvent>, broadcast::Receiver<EngineEvent>) {
    broadcast::channel(capacity)
}
