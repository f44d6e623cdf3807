//! In-memory process fakes for driving the engine deterministically.
//!
//! A [`ScriptedProcess`] replays a fixed list of [`Step`]s. Silent steps move
//! a shared [`ManualClock`] forward by the read timeout the driver asked for,
//! so deadlines and stability windows play out without real sleeps.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether_api::CommandSpec;

use crate::clock::{Clock, ManualClock};
use crate::config::EngineConfig;
use crate::error::DriveError;
use crate::process::{ControlledProcess, Launcher, ReadOutcome};

/// One scripted read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Output arrives immediately.
    Output(String),
    /// The read times out.
    Silence,
    /// The subprocess closes its output.
    Close,
    /// The read fails.
    Fail(io::ErrorKind),
}

impl Step {
    pub fn output(text: impl Into<String>) -> Self {
        Step::Output(text.into())
    }

    /// `n` consecutive silent reads.
    pub fn silence(n: usize) -> impl Iterator<Item = Step> {
        std::iter::repeat_n(Step::Silence, n)
    }
}

/// A write the engine made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentInput {
    /// Reads completed before the write.
    pub after_read: usize,
    /// Clock time of the write, relative to the clock's creation.
    pub at: Duration,
    pub text: String,
}

/// Shared view of what a [`ScriptedProcess`] saw.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    sent: Arc<Mutex<Vec<SentInput>>>,
    killed: Arc<AtomicBool>,
}

impl Transcript {
    pub fn sent(&self) -> Vec<SentInput> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// A fake subprocess that replays a script.
///
/// Once the script runs out every read is silent.
pub struct ScriptedProcess {
    steps: VecDeque<Step>,
    clock: Arc<ManualClock>,
    transcript: Transcript,
    reads: usize,
    closed: bool,
    write_error: Option<io::ErrorKind>,
}

impl ScriptedProcess {
    pub fn new(clock: Arc<ManualClock>, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            clock,
            transcript: Transcript::default(),
            reads: 0,
            closed: false,
            write_error: None,
        }
    }

    /// Make every write fail with `kind`.
    pub fn failing_writes(mut self, kind: io::ErrorKind) -> Self {
        self.write_error = Some(kind);
        self
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }
}

impl ControlledProcess for ScriptedProcess {
    fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(kind) = self.write_error {
            return Err(io::Error::from(kind));
        }
        self.transcript
            .sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentInput {
                after_read: self.reads,
                at: self.clock.elapsed(),
                text: String::from_utf8_lossy(bytes).into_owned(),
            });
        Ok(())
    }

    fn next_chunk(&mut self, timeout: Duration) -> io::Result<ReadOutcome> {
        if self.closed {
            return Ok(ReadOutcome::Closed);
        }
        self.reads += 1;

        match self.steps.pop_front().unwrap_or(Step::Silence) {
            Step::Output(text) => Ok(ReadOutcome::Data(text)),
            Step::Silence => {
                self.clock.sleep(timeout);
                Ok(ReadOutcome::Timeout)
            }
            Step::Close => {
                self.closed = true;
                Ok(ReadOutcome::Closed)
            }
            Step::Fail(kind) => Err(io::Error::from(kind)),
        }
    }

    fn kill(&mut self) {
        self.closed = true;
        self.transcript.killed.store(true, Ordering::SeqCst);
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }
}

/// Hands out a single [`ScriptedProcess`], or fails to spawn.
pub struct ScriptedLauncher {
    process: Mutex<Option<ScriptedProcess>>,
    failure: Option<String>,
}

impl ScriptedLauncher {
    pub fn new(process: ScriptedProcess) -> Self {
        Self {
            process: Mutex::new(Some(process)),
            failure: None,
        }
    }

    /// A launcher whose every spawn fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            process: Mutex::new(None),
            failure: Some(message.into()),
        }
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(
        &self,
        spec: &CommandSpec,
        _config: &EngineConfig,
    ) -> Result<Box<dyn ControlledProcess>, DriveError> {
        let process = self
            .process
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match (process, &self.failure) {
            (Some(process), None) => Ok(Box::new(process)),
            (_, failure) => Err(DriveError::SpawnFailed {
                command: spec.display_line(),
                message: failure
                    .clone()
                    .unwrap_or_else(|| "script already consumed".to_string()),
            }),
        }
    }
}
