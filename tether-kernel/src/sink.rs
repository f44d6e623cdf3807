//! Observability sinks for engine events.

use std::sync::Mutex;

use tether_api::DriveEvent;
use tokio::sync::broadcast;

/// Receives structured events from the drivers.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DriveEvent);
}

/// Forwards events to `tracing`. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &DriveEvent) {
        match event {
            DriveEvent::Spawned { command, pid } => {
                tracing::info!(command = %command, pid = ?pid, "subprocess spawned");
            }
            DriveEvent::Chunk { kind, bytes } => {
                tracing::debug!(kind = %kind, bytes, "output chunk");
            }
            DriveEvent::IdleRead { consecutive } => {
                tracing::debug!(consecutive, "read timed out");
            }
            DriveEvent::Sent { input } => {
                tracing::debug!(input = ?input, "sent input");
            }
            DriveEvent::PhaseChanged { phase } => {
                tracing::info!(phase = ?phase, "phase changed");
            }
            DriveEvent::MarkerSeen => {
                tracing::trace!("working marker seen");
            }
            DriveEvent::GateDecision {
                pattern,
                criteria_met,
            } => {
                tracing::info!(pattern = %pattern, criteria_met, "confirmation prompt answered");
            }
            DriveEvent::CancelSendFailed { error } => {
                tracing::warn!(error = %error, "failed to send cancel key");
            }
            DriveEvent::Completed { bytes, duration_ms } => {
                tracing::info!(bytes, duration_ms, "session completed");
            }
            DriveEvent::TimedOut { bytes } => {
                tracing::warn!(bytes, "session deadline elapsed");
            }
        }
    }
}

/// Publishes events on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DriveEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<DriveEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriveEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &DriveEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &DriveEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DriveEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DriveEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &DriveEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
