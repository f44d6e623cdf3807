//! Phase two: waiting for the working marker to go quiet.

use std::time::{Duration, Instant};

use regex::Regex;
use tether_api::{DriveEvent, Input, Phase};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Interrupt;
use crate::process::{ControlledProcess, ReadOutcome};
use crate::session::Session;
use crate::sink::EventSink;

/// Idle detection state.
///
/// Completion holds exactly when `now - last_marker_seen >= stability_window`.
/// A marker can only move `last_marker_seen` forward, so a late marker always
/// postpones completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionWindow {
    poll_interval: Duration,
    stability_window: Duration,
    last_marker_seen: Instant,
}

impl CompletionWindow {
    /// A window that starts counting from `started`.
    pub fn new(poll_interval: Duration, stability_window: Duration, started: Instant) -> Self {
        Self {
            poll_interval,
            stability_window,
            last_marker_seen: started,
        }
    }

    pub fn from_config(config: &EngineConfig, started: Instant) -> Self {
        Self::new(config.poll_interval(), config.stability_window(), started)
    }

    /// Record a marker sighting.
    pub fn mark(&mut self, now: Instant) {
        self.last_marker_seen = self.last_marker_seen.max(now);
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_marker_seen) >= self.stability_window
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn stability_window(&self) -> Duration {
        self.stability_window
    }

    pub fn last_marker_seen(&self) -> Instant {
        self.last_marker_seen
    }
}

/// How phase two ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorExit {
    /// The marker stayed away for the whole window. The cancel burst was sent.
    Idle,
    /// The subprocess closed its output first.
    Closed,
}

pub(crate) struct CompletionMonitor<'a> {
    config: &'a EngineConfig,
    marker: &'a Regex,
    clock: &'a dyn Clock,
    sink: &'a dyn EventSink,
}

impl<'a> CompletionMonitor<'a> {
    pub(crate) fn new(
        config: &'a EngineConfig,
        marker: &'a Regex,
        clock: &'a dyn Clock,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            config,
            marker,
            clock,
            sink,
        }
    }

    pub(crate) fn run(
        &self,
        process: &mut dyn ControlledProcess,
        session: &mut Session,
    ) -> Result<MonitorExit, Interrupt> {
        self.sink.emit(&DriveEvent::PhaseChanged {
            phase: Phase::Completion,
        });
        let mut window = CompletionWindow::from_config(self.config, self.clock.now());

        loop {
            let now = self.clock.now();
            if window.is_complete(now) {
                break;
            }
            let Some(remaining) = session.remaining(now) else {
                return Err(Interrupt::Deadline);
            };

            match process.next_chunk(window.poll_interval().min(remaining))? {
                ReadOutcome::Data(text) => {
                    if self.marker.is_match(&text) {
                        window.mark(self.clock.now());
                        self.sink.emit(&DriveEvent::MarkerSeen);
                    }
                    session.append(&text);
                }
                ReadOutcome::Timeout => {}
                ReadOutcome::Closed => {
                    if session.is_expired(self.clock.now()) || process.deadline_fired() {
                        return Err(Interrupt::Deadline);
                    }
                    tracing::debug!("output closed while waiting for completion");
                    return Ok(MonitorExit::Closed);
                }
            }
        }

        tracing::debug!(
            "working marker quiet for {:?}, winding the session down",
            window.stability_window()
        );
        self.cancel_burst(process);
        Ok(MonitorExit::Idle)
    }

    /// Best effort. Failed sends are reported and skipped.
    fn cancel_burst(&self, process: &mut dyn ControlledProcess) {
        for i in 0..self.config.cancel_count {
            if i > 0 {
                self.clock.sleep(self.config.cancel_interval());
            }
            match process.send_raw(self.config.cancel_key.as_bytes()) {
                Ok(()) => self.sink.emit(&DriveEvent::Sent {
                    input: Input::Cancel,
                }),
                Err(e) => self.sink.emit(&DriveEvent::CancelSendFailed {
                    error: e.to_string(),
                }),
            }
        }
    }
}
