//! Process management - PTY launch, reads with timeouts, teardown.

mod pty;
mod watchdog;

pub use pty::PtyProcess;
pub use watchdog::Watchdog;

use std::io;
use std::time::Duration;

use tether_api::CommandSpec;

use crate::config::EngineConfig;
use crate::error::DriveError;

/// Result of waiting for output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Decoded output, in arrival order.
    Data(String),
    /// Nothing arrived within the wait. Not an error.
    Timeout,
    /// The subprocess closed its output.
    Closed,
}

/// A running subprocess the drivers can talk to.
///
/// Implementations are driven from a single thread; calls are never made
/// concurrently.
pub trait ControlledProcess: Send {
    /// Write raw bytes to the subprocess's input.
    fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Block up to `timeout` for the next chunk of output.
    fn next_chunk(&mut self, timeout: Duration) -> io::Result<ReadOutcome>;

    /// Terminate the subprocess and release its resources. Idempotent.
    fn kill(&mut self);

    fn pid(&self) -> Option<u32> {
        None
    }

    /// Whether the subprocess was killed for outliving its deadline.
    fn deadline_fired(&self) -> bool {
        false
    }

    /// Write `text` followed by `line_ending`.
    fn send_line(&mut self, text: &str, line_ending: &str) -> io::Result<()> {
        let mut line = String::with_capacity(text.len() + line_ending.len());
        line.push_str(text);
        line.push_str(line_ending);
        self.send_raw(line.as_bytes())
    }
}

/// Starts subprocesses for the engine.
pub trait Launcher: Send + Sync {
    /// Spawn `spec` with its deadline armed.
    fn launch(
        &self,
        spec: &CommandSpec,
        config: &EngineConfig,
    ) -> Result<Box<dyn ControlledProcess>, DriveError>;
}

/// Launches subprocesses attached to a pseudo-terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtyLauncher;

impl Launcher for PtyLauncher {
    fn launch(
        &self,
        spec: &CommandSpec,
        config: &EngineConfig,
    ) -> Result<Box<dyn ControlledProcess>, DriveError> {
        match PtyProcess::spawn(spec, config) {
            Ok(process) => Ok(Box::new(process)),
            Err(e) => Err(DriveError::SpawnFailed {
                command: spec.display_line(),
                message: format!("{e:#}"),
            }),
        }
    }
}
