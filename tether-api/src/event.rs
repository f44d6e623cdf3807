//! Engine events emitted to observability sinks.

use crate::OutputKind;
use serde::{Deserialize, Serialize};

/// Which driver loop is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Getting the payload accepted.
    Injection,
    /// Waiting for the working marker to go quiet.
    Completion,
    /// Answering configured confirmation prompts.
    Gate,
}

/// What the engine wrote to the subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Input {
    Payload,
    Continuation,
    Affirmative,
    /// A gate rule fired with its configured response.
    Response(String),
    Rejection,
    Cancel,
}

/// Events emitted by the engine during an invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DriveEvent {
    /// The subprocess is running.
    Spawned {
        command: String,
        pid: Option<u32>,
    },

    /// A chunk of output was read and classified.
    Chunk {
        kind: OutputKind,
        bytes: usize,
    },

    /// A read timed out with nothing available.
    IdleRead {
        consecutive: u32,
    },

    /// Input was written to the subprocess.
    Sent {
        input: Input,
    },

    /// The engine moved to another phase.
    PhaseChanged {
        phase: Phase,
    },

    /// The working marker reappeared during the completion phase.
    MarkerSeen,

    /// A gate rule matched a line.
    GateDecision {
        pattern: String,
        criteria_met: bool,
    },

    /// A best-effort cancel keystroke could not be written.
    CancelSendFailed {
        error: String,
    },

    /// The invocation finished.
    Completed {
        bytes: usize,
        duration_ms: u64,
    },

    /// The overall deadline elapsed.
    TimedOut {
        bytes: usize,
    },
}
