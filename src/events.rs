//! Renderer-facing change notifications.
//!
//! The engine never calls into a renderer directly. Everything an external
//! UI needs arrives as [`EngineEvent`]s over a broadcast channel; the
//! renderer subscribes and reacts, the engine does not care whether anyone
//! is listening.

use std::collections::BTreeMap;

use tokio::sync::broadcast;

use crate::session::ConnectionSnapshot;
use crate::store::RegisterWindow;

/// Toast severity, mirrored by whatever presentation the renderer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A single engine-side state change or discrete signal.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Connection state changed; carries the full snapshot.
    Connection(ConnectionSnapshot),
    /// Coil store changed; carries the full address-to-state map.
    Coils(BTreeMap<u16, bool>),
    /// Register window replaced wholesale.
    Registers(RegisterWindow),
    /// One human-readable notification.
    Toast { message: String, severity: Severity },
    /// A user-triggered operation started or finished.
    Loading(bool),
}

/// Broadcast fan-out of engine events.
///
/// Slow or absent subscribers never block the engine; the channel drops the
/// oldest events for a lagging receiver.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Send an event. No subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn toast(&self, message: impl Into<String>, severity: Severity) {
        self.emit(EngineEvent::Toast {
            message: message.into(),
            severity,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
