//! Tether Kernel - the interactive subprocess automation engine.
//!
//! This crate drives a prompt-driven program through a pseudo-terminal:
//! - Launcher (portable-pty, process-group teardown, deadline watchdog)
//! - Interaction driver (phase one, getting the task payload accepted)
//! - Completion monitor (phase two, idle detection on a working marker)
//! - Confirmation gate (answering configured prompts)
//! - Event sinks for observability

pub mod clock;
pub mod config;
pub mod process;
pub mod sink;

mod driver;
mod error;
mod gate;
mod monitor;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, PatternSpec};
pub use error::{ConfigError, DriveError, ErrorKind};
pub use gate::{GateDecision, criteria_met, evaluate};
pub use monitor::CompletionWindow;
pub use process::{ControlledProcess, Launcher, PtyLauncher, ReadOutcome};
pub use session::Session;
pub use sink::{BroadcastSink, EventSink, NullSink, RecordingSink, TracingSink};

use std::io;
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use tether_api::{CommandSpec, ConfirmationRule, DriveEvent, DriveOutput, Phase};
use tether_pump::PatternRegistry;

use driver::{InjectionExit, InteractionDriver};
use error::Interrupt;
use gate::Gate;
use monitor::CompletionMonitor;

/// The engine - launches subprocesses and drives them to completion.
///
/// Cheap to clone. Each invocation gets its own subprocess and session, so
/// clones can run concurrently.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    registry: Arc<PatternRegistry>,
    marker: Regex,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    launcher: Arc<dyn Launcher>,
}

impl Engine {
    /// Create an engine that launches real PTY subprocesses.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let registry = config.pattern_registry()?;
        let marker = config.marker_regex()?;

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            marker,
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingSink),
            launcher: Arc::new(PtyLauncher),
        })
    }

    /// Create an engine from the config file in its default location.
    pub fn from_default_config() -> Result<Self, ConfigError> {
        Self::new(EngineConfig::load_default()?)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `spec`, inject `payload` and wait for the session to go idle.
    ///
    /// Returns the captured output. An error still carries whatever output
    /// was captured before it.
    pub fn drive_task(&self, spec: &CommandSpec, payload: &str) -> Result<DriveOutput, DriveError> {
        let started = self.clock.now();
        let mut process = self.launch(spec)?;
        let mut session = Session::new(payload, started, spec.effective_timeout());

        let result = self.drive(process.as_mut(), &mut session);
        process.kill();
        self.finish(result, session, started)
    }

    /// Run `spec`, answering prompts that match `rules` until it exits.
    ///
    /// The captured output is every scanned line, newline-separated.
    pub fn run_gate(
        &self,
        spec: &CommandSpec,
        rules: &[ConfirmationRule],
    ) -> Result<DriveOutput, DriveError> {
        let started = self.clock.now();
        let mut process = self.launch(spec)?;
        let mut session = Session::new("", started, spec.effective_timeout());

        let result = Gate::new(&self.config, &self.registry, &*self.clock, &*self.sink)
            .run(process.as_mut(), &mut session, rules)
            .map(|()| None);
        process.kill();
        self.finish(result, session, started)
    }

    /// [`Engine::drive_task`] on the blocking thread pool.
    pub async fn drive_task_async(
        &self,
        spec: CommandSpec,
        payload: String,
    ) -> Result<DriveOutput, DriveError> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.drive_task(&spec, &payload))
            .await
            .map_err(join_error)?
    }

    /// [`Engine::run_gate`] on the blocking thread pool.
    pub async fn run_gate_async(
        &self,
        spec: CommandSpec,
        rules: Vec<ConfirmationRule>,
    ) -> Result<DriveOutput, DriveError> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.run_gate(&spec, &rules))
            .await
            .map_err(join_error)?
    }

    fn launch(&self, spec: &CommandSpec) -> Result<Box<dyn ControlledProcess>, DriveError> {
        let process = self.launcher.launch(spec, &self.config)?;
        self.sink.emit(&DriveEvent::Spawned {
            command: spec.display_line(),
            pid: process.pid(),
        });
        Ok(process)
    }

    /// Both phases. `Ok(Some(_))` carries a still-running diagnostic.
    fn drive(
        &self,
        process: &mut dyn ControlledProcess,
        session: &mut Session,
    ) -> Result<Option<String>, Interrupt> {
        self.sink.emit(&DriveEvent::PhaseChanged {
            phase: Phase::Injection,
        });

        let driver = InteractionDriver::new(&self.config, &self.registry, &*self.clock, &*self.sink);
        match driver.run(process, session)? {
            InjectionExit::Accepted => {
                CompletionMonitor::new(&self.config, &self.marker, &*self.clock, &*self.sink)
                    .run(process, session)?;
                Ok(None)
            }
            InjectionExit::Closed => Ok(None),
            InjectionExit::StillRunning(diagnostic) => Ok(Some(diagnostic)),
        }
    }

    fn finish(
        &self,
        result: Result<Option<String>, Interrupt>,
        session: Session,
        started: Instant,
    ) -> Result<DriveOutput, DriveError> {
        let timeout = session.timeout();
        let output = session.into_output();
        let bytes = output.len();

        match result {
            Ok(None) => {
                let elapsed = self.clock.now().saturating_duration_since(started);
                self.sink.emit(&DriveEvent::Completed {
                    bytes,
                    duration_ms: elapsed.as_millis() as u64,
                });
                Ok(DriveOutput::completed(output))
            }
            Ok(Some(diagnostic)) => {
                tracing::info!("{}", diagnostic);
                Ok(DriveOutput::still_running(output, diagnostic))
            }
            Err(interrupt) => {
                if matches!(interrupt, Interrupt::Deadline) {
                    self.sink.emit(&DriveEvent::TimedOut { bytes });
                }
                Err(interrupt.into_error(timeout, output))
            }
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> DriveError {
    DriveError::Io {
        source: io::Error::other(e),
        output: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedLauncher, ScriptedProcess, Step, Transcript};
    use std::time::Duration;
    use tether_api::{DriveStatus, Input};

    fn engine_with(steps: Vec<Step>) -> (Engine, Transcript, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = Arc::new(ManualClock::new());
        let process = ScriptedProcess::new(clock.clone(), steps);
        let transcript = process.transcript();
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(EngineConfig::default())
            .unwrap()
            .with_clock(clock.clone())
            .with_sink(sink.clone())
            .with_launcher(Arc::new(ScriptedLauncher::new(process)));
        (engine, transcript, clock, sink)
    }

    #[test]
    fn test_welcome_then_cursor_reaches_completion() {
        let (engine, transcript, clock, sink) = engine_with(vec![
            Step::output("Welcome to Agent\n"),
            Step::output("> "),
            Step::output("✻ Working… (esc to interrupt)\n"),
            Step::output("RESPONSE: fixed\n"),
        ]);

        let output = engine
            .drive_task(&CommandSpec::new("agent"), "fix bug")
            .unwrap();

        assert!(output.is_completed());
        assert_eq!(
            output.text,
            "Welcome to Agent\n> ✻ Working… (esc to interrupt)\nRESPONSE: fixed\n"
        );
        assert_eq!(
            transcript.texts(),
            vec!["fix bug\n", "\r", "\u{1b}", "\u{1b}", "\u{1b}"]
        );
        assert!(transcript.was_killed());
        assert_eq!(clock.elapsed(), Duration::from_millis(5400));

        let events = sink.events();
        let phases: Vec<Phase> = events
            .iter()
            .filter_map(|e| match e {
                DriveEvent::PhaseChanged { phase } => Some(*phase),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![Phase::Injection, Phase::Completion]);
        assert!(matches!(events.first(), Some(DriveEvent::Spawned { pid: Some(4242), .. })));
        assert!(matches!(events.last(), Some(DriveEvent::Completed { duration_ms: 5400, .. })));
    }

    #[test]
    fn test_end_of_stream_skips_completion_phase() {
        let (engine, transcript, _, _) =
            engine_with(vec![Step::output("usage: agent [options]\n"), Step::Close]);

        let output = engine
            .drive_task(&CommandSpec::new("agent"), "fix bug")
            .unwrap();
        assert_eq!(output.status, DriveStatus::Completed);
        assert_eq!(output.text, "usage: agent [options]\n");
        assert!(transcript.sent().is_empty());
    }

    #[test]
    fn test_silent_process_reports_still_running() {
        let (engine, _, _, _) = engine_with(Step::silence(11).collect());

        let first = engine.drive_task(&CommandSpec::new("agent"), "").unwrap();
        assert!(!first.is_completed());
        assert_eq!(
            first.status,
            DriveStatus::StillRunning(
                "no output after 11 consecutive reads; assuming the process is still working"
                    .into()
            )
        );
    }

    #[test]
    fn test_one_second_deadline() {
        let (engine, transcript, clock, sink) = engine_with(vec![]);

        let err = engine
            .drive_task(&CommandSpec::new("agent").timeout_secs(1), "fix bug")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
        assert!(transcript.was_killed());
        assert!(matches!(sink.events().last(), Some(DriveEvent::TimedOut { bytes: 0 })));
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        let (engine, _, _, _) = engine_with(vec![Step::output("usage\n"), Step::Close]);
        let spec = CommandSpec::new("agent").timeout_secs(i64::MAX);

        let output = engine.drive_task(&spec, "fix bug").unwrap();
        assert!(output.is_completed());
        assert_eq!(output.text, "usage\n");

        let (engine, _, _, _) = engine_with(vec![Step::output("done\n"), Step::Close]);
        assert!(engine.run_gate(&spec, &[]).unwrap().is_completed());
    }

    #[test]
    fn test_timeout_keeps_partial_output() {
        let (engine, _, _, _) = engine_with(vec![
            Step::output("Welcome to Agent\n"),
            Step::output("> "),
            Step::output("(esc to interrupt)"),
            Step::output("(esc to interrupt)"),
        ]);
        // The deadline lands inside the stability window.
        assert!(engine.config().stability_window() > Duration::from_secs(2));

        let err = engine
            .drive_task(&CommandSpec::new("agent").timeout_secs(2), "fix bug")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(
            err.output(),
            "Welcome to Agent\n> (esc to interrupt)(esc to interrupt)"
        );
    }

    #[test]
    fn test_broken_pipe_surfaces_with_output() {
        let (engine, transcript, _, _) = engine_with(vec![
            Step::output("Welcome to Agent\n"),
            Step::Fail(io::ErrorKind::BrokenPipe),
        ]);

        let err = engine
            .drive_task(&CommandSpec::new("agent"), "fix bug")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.output(), "Welcome to Agent\n");
        assert!(transcript.was_killed());
    }

    #[test]
    fn test_spawn_failure() {
        let engine = Engine::new(EngineConfig::default())
            .unwrap()
            .with_sink(Arc::new(NullSink))
            .with_launcher(Arc::new(ScriptedLauncher::failing("No such file or directory")));

        let err = engine
            .drive_task(&CommandSpec::new("missing-agent"), "fix bug")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SpawnFailed);
        assert_eq!(err.output(), "");
        assert!(err.to_string().contains("missing-agent"));
    }

    #[test]
    fn test_gate_mode() {
        let (engine, transcript, _, sink) = engine_with(vec![
            Step::output("Running tests...\nNo test failures detected\n"),
            Step::output("Are you sure you want to proceed? "),
            Step::Silence,
            Step::Close,
        ]);
        let rules = vec![
            ConfirmationRule::new("Are you sure you want to proceed?", "y")
                .requires("No test failures detected"),
        ];

        let output = engine.run_gate(&CommandSpec::new("make"), &rules).unwrap();
        assert!(output.is_completed());
        assert_eq!(transcript.texts(), vec!["y\n"]);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            DriveEvent::Sent {
                input: Input::Response(r)
            } if r == "y"
        )));
        assert!(criteria_met(&output.text, &["No test failures detected".to_string()]));
    }

    #[tokio::test]
    async fn test_async_entry_point() {
        let (engine, transcript, _, _) =
            engine_with(vec![Step::output("Proceed? (y/n)"), Step::Close]);

        let output = engine
            .drive_task_async(CommandSpec::new("agent"), "fix bug".into())
            .await
            .unwrap();
        assert!(output.is_completed());
        assert_eq!(transcript.texts(), vec!["y\n"]);
    }
}
