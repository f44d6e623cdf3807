//! Phase one: getting the task payload accepted.
//!
//! The driver reads one chunk at a time, classifies it and reacts before
//! asking for the next one. Every visual cue may recur, so each reaction
//! depends only on the session flags and never assumes a cue is final.

use std::io;
use std::time::Duration;

use tether_api::{DriveEvent, Input, OutputKind};
use tether_pump::PatternRegistry;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Interrupt;
use crate::process::{ControlledProcess, ReadOutcome};
use crate::session::Session;
use crate::sink::EventSink;

/// How phase one ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InjectionExit {
    /// Payload and continuation are both in; move on to completion.
    Accepted,
    /// The subprocess closed its output.
    Closed,
    /// Too many silent reads. Carries the diagnostic for the caller.
    StillRunning(String),
}

pub(crate) struct InteractionDriver<'a> {
    config: &'a EngineConfig,
    registry: &'a PatternRegistry,
    clock: &'a dyn Clock,
    sink: &'a dyn EventSink,
}

impl<'a> InteractionDriver<'a> {
    pub(crate) fn new(
        config: &'a EngineConfig,
        registry: &'a PatternRegistry,
        clock: &'a dyn Clock,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            config,
            registry,
            clock,
            sink,
        }
    }

    pub(crate) fn run(
        &self,
        process: &mut dyn ControlledProcess,
        session: &mut Session,
    ) -> Result<InjectionExit, Interrupt> {
        loop {
            let Some(remaining) = session.remaining(self.clock.now()) else {
                return Err(Interrupt::Deadline);
            };
            let wait = self.config.scan_timeout().min(remaining);

            match process.next_chunk(wait)? {
                ReadOutcome::Closed => {
                    if session.is_expired(self.clock.now()) || process.deadline_fired() {
                        return Err(Interrupt::Deadline);
                    }
                    tracing::debug!("output closed during injection");
                    return Ok(InjectionExit::Closed);
                }
                ReadOutcome::Timeout => {
                    if let Some(diagnostic) = self.on_idle(process, session)? {
                        return Ok(InjectionExit::StillRunning(diagnostic));
                    }
                }
                ReadOutcome::Data(text) => {
                    session.consecutive_empty_reads = 0;

                    let kind = self.registry.classify(&text);
                    self.sink.emit(&DriveEvent::Chunk {
                        kind,
                        bytes: text.len(),
                    });
                    session.append(&text);
                    self.react(process, session, kind)?;

                    if session.payload_sent && session.continuation_sent {
                        return Ok(InjectionExit::Accepted);
                    }
                }
            }
        }
    }

    /// Handle a read that timed out. Returns a diagnostic once the subprocess
    /// has been silent for too long.
    fn on_idle(
        &self,
        process: &mut dyn ControlledProcess,
        session: &mut Session,
    ) -> io::Result<Option<String>> {
        session.consecutive_empty_reads += 1;
        let idle = session.consecutive_empty_reads;
        self.sink.emit(&DriveEvent::IdleRead { consecutive: idle });

        if idle > self.config.idle_reads_before_payload
            && !session.payload_sent
            && session.has_payload()
        {
            tracing::debug!("no prompt after {} empty reads, sending payload", idle);
            self.send_payload(process, session)?;
        }

        if idle > self.config.idle_reads_before_giving_up {
            return Ok(Some(format!(
                "no output after {idle} consecutive reads; assuming the process is still working"
            )));
        }
        Ok(None)
    }

    fn react(
        &self,
        process: &mut dyn ControlledProcess,
        session: &mut Session,
        kind: OutputKind,
    ) -> io::Result<()> {
        match kind {
            OutputKind::YesNoPrompt => {
                process.send_line(&self.config.affirmative, &self.config.line_ending)?;
                self.sink.emit(&DriveEvent::Sent {
                    input: Input::Affirmative,
                });
            }
            OutputKind::PasteInputBox => {
                if !session.payload_sent {
                    self.send_payload(process, session)?;
                } else {
                    // A second paste box is the UI asking to confirm the paste.
                    self.send_continuation(process)?;
                    self.settle(session, self.config.continuation_settle());
                    session.continuation_sent = true;
                }
            }
            kind if kind.is_input_ready() => {
                if !session.payload_sent {
                    let wrote = self.send_payload(process, session)?;
                    if wrote && submits_after_payload(kind) {
                        self.settle(session, self.config.payload_settle());
                        self.send_continuation(process)?;
                    }
                } else {
                    self.send_continuation(process)?;
                    session.continuation_sent = true;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Sleep for `pause`, but never past the session deadline.
    fn settle(&self, session: &Session, pause: Duration) {
        let left = session
            .remaining(self.clock.now())
            .map_or(Duration::ZERO, |left| left.min(pause));
        self.clock.sleep(left);
    }

    /// Marks the payload sent. Returns whether anything was written.
    fn send_payload(
        &self,
        process: &mut dyn ControlledProcess,
        session: &mut Session,
    ) -> io::Result<bool> {
        session.payload_sent = true;
        if !session.has_payload() {
            tracing::debug!("no payload to send");
            return Ok(false);
        }

        process.send_line(session.payload(), &self.config.line_ending)?;
        self.sink.emit(&DriveEvent::Sent {
            input: Input::Payload,
        });
        Ok(true)
    }

    fn send_continuation(&self, process: &mut dyn ControlledProcess) -> io::Result<()> {
        process.send_raw(self.config.continuation.as_bytes())?;
        self.sink.emit(&DriveEvent::Sent {
            input: Input::Continuation,
        });
        Ok(())
    }
}

/// Chat-style prompts keep typed text in the input field until submitted.
fn submits_after_payload(kind: OutputKind) -> bool {
    matches!(kind, OutputKind::HumanPrefix | OutputKind::PromptPrefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sink::{NullSink, RecordingSink};
    use crate::testing::{ScriptedProcess, Step};
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        config: EngineConfig,
        registry: PatternRegistry,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                config: EngineConfig::default(),
                registry: PatternRegistry::builtin().unwrap(),
                clock: Arc::new(ManualClock::new()),
            }
        }

        fn session(&self, payload: &str) -> Session {
            Session::new(payload, self.clock.now(), Duration::from_secs(120))
        }

        fn run(
            &self,
            process: &mut ScriptedProcess,
            session: &mut Session,
        ) -> Result<InjectionExit, Interrupt> {
            InteractionDriver::new(&self.config, &self.registry, &*self.clock, &NullSink)
                .run(process, session)
        }
    }

    #[test]
    fn test_banner_then_cursor() {
        let h = Harness::new();
        let mut process = ScriptedProcess::new(
            h.clock.clone(),
            [Step::output("Welcome to Agent\n"), Step::output("> ")],
        );
        let transcript = process.transcript();
        let mut session = h.session("fix bug");

        assert_eq!(h.run(&mut process, &mut session).unwrap(), InjectionExit::Accepted);
        assert_eq!(transcript.texts(), vec!["fix bug\n", "\r"]);
        assert_eq!(transcript.sent()[0].after_read, 1);
        assert_eq!(session.output(), "Welcome to Agent\n> ");
    }

    #[test]
    fn test_paste_box_sends_payload_once() {
        let h = Harness::new();
        let mut process = ScriptedProcess::new(
            h.clock.clone(),
            [
                Step::output("╭──╮\n│ > \n"),
                Step::output("│ > [Pasted text +3 lines]\n"),
            ],
        );
        let transcript = process.transcript();
        let mut session = h.session("fix bug");

        assert_eq!(h.run(&mut process, &mut session).unwrap(), InjectionExit::Accepted);
        assert_eq!(transcript.texts(), vec!["fix bug\n", "\r"]);
        // The paste confirmation is followed by a settle delay.
        assert_eq!(h.clock.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_yes_no_prompts_each_get_one_answer() {
        let h = Harness::new();
        let mut process = ScriptedProcess::new(
            h.clock.clone(),
            [
                Step::output("Do you want to proceed? (y/n)"),
                Step::output("Allow edit to main.rs? [y/n]"),
                Step::output("Overwrite? (yes/no)"),
                Step::Close,
            ],
        );
        let transcript = process.transcript();
        let mut session = h.session("fix bug");

        assert_eq!(h.run(&mut process, &mut session).unwrap(), InjectionExit::Closed);
        assert_eq!(transcript.texts(), vec!["y\n", "y\n", "y\n"]);
        assert!(!session.payload_sent());
        assert!(!session.continuation_sent());
    }

    #[test]
    fn test_idle_fallback_sends_payload() {
        let h = Harness::new();
        let steps: Vec<Step> = Step::silence(6).chain([Step::output("> ")]).collect();
        let mut process = ScriptedProcess::new(h.clock.clone(), steps);
        let transcript = process.transcript();
        let mut session = h.session("fix bug");

        assert_eq!(h.run(&mut process, &mut session).unwrap(), InjectionExit::Accepted);
        let sent = transcript.sent();
        assert_eq!(sent[0].text, "fix bug\n");
        assert_eq!(sent[0].after_read, 6);
        assert_eq!(sent[1].text, "\r");
    }

    #[test]
    fn test_gives_up_after_silence_without_payload() {
        let h = Harness::new();
        let mut process = ScriptedProcess::new(h.clock.clone(), Step::silence(20));
        let transcript = process.transcript();
        let mut session = h.session("");

        let exit = h.run(&mut process, &mut session).unwrap();
        assert_eq!(
            exit,
            InjectionExit::StillRunning(
                "no output after 11 consecutive reads; assuming the process is still working"
                    .into()
            )
        );
        assert!(transcript.sent().is_empty());
        assert_eq!(h.clock.elapsed(), Duration::from_secs(55));
    }

    #[test]
    fn test_output_resets_idle_count() {
        let h = Harness::new();
        let steps: Vec<Step> = Step::silence(4)
            .chain([Step::output("thinking...")])
            .chain(Step::silence(4))
            .chain([Step::Close])
            .collect();
        let mut process = ScriptedProcess::new(h.clock.clone(), steps);
        let transcript = process.transcript();
        let mut session = h.session("fix bug");

        assert_eq!(h.run(&mut process, &mut session).unwrap(), InjectionExit::Closed);
        assert!(transcript.sent().is_empty());
        assert_eq!(session.consecutive_empty_reads(), 4);
    }

    #[test]
    fn test_prompt_prefix_submits_payload() {
        let h = Harness::new();
        let mut process = ScriptedProcess::new(h.clock.clone(), [Step::output("Human: "), Step::Close]);
        let transcript = process.transcript();
        let mut session = h.session("fix bug");

        assert_eq!(h.run(&mut process, &mut session).unwrap(), InjectionExit::Closed);
        let sent = transcript.sent();
        assert_eq!(transcript.texts(), vec!["fix bug\n", "\r"]);
        assert_eq!(sent[1].at - sent[0].at, Duration::from_millis(500));
        // The submit keystroke does not count as the continuation.
        assert!(!session.continuation_sent());
    }

    #[test]
    fn test_empty_payload_is_marked_sent() {
        let h = Harness::new();
        let mut process =
            ScriptedProcess::new(h.clock.clone(), [Step::output("│ > "), Step::output("│ > ")]);
        let transcript = process.transcript();
        let mut session = h.session("");

        assert_eq!(h.run(&mut process, &mut session).unwrap(), InjectionExit::Accepted);
        assert_eq!(transcript.texts(), vec!["\r"]);
    }

    #[test]
    fn test_deadline_bounds_scanning() {
        let h = Harness::new();
        let mut process = ScriptedProcess::new(h.clock.clone(), Step::silence(3));
        let mut session = Session::new("fix bug", h.clock.now(), Duration::from_secs(1));

        assert!(matches!(
            h.run(&mut process, &mut session),
            Err(Interrupt::Deadline)
        ));
        // The read was shortened to the time left.
        assert_eq!(h.clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_settle_delays_stop_at_the_deadline() {
        let h = Harness::new();
        let mut process =
            ScriptedProcess::new(h.clock.clone(), [Step::output("│ > "), Step::output("│ > ")]);
        let mut session = Session::new("fix bug", h.clock.now(), Duration::from_secs(1));

        assert_eq!(h.run(&mut process, &mut session).unwrap(), InjectionExit::Accepted);
        assert_eq!(h.clock.elapsed(), Duration::from_secs(1));

        let h = Harness::new();
        let mut process =
            ScriptedProcess::new(h.clock.clone(), [Step::output("Human: "), Step::Close]);
        let transcript = process.transcript();
        let mut session = Session::new("fix bug", h.clock.now(), Duration::from_millis(200));

        assert!(matches!(
            h.run(&mut process, &mut session),
            Err(Interrupt::Deadline)
        ));
        let sent = transcript.sent();
        assert_eq!(transcript.texts(), vec!["fix bug\n", "\r"]);
        assert_eq!(sent[1].at - sent[0].at, Duration::from_millis(200));
    }

    #[test]
    fn test_read_failure_interrupts() {
        let h = Harness::new();
        let mut process = ScriptedProcess::new(
            h.clock.clone(),
            [Step::output("Welcome to Agent"), Step::Fail(io::ErrorKind::BrokenPipe)],
        )
        .failing_writes(io::ErrorKind::BrokenPipe);
        let mut session = h.session("");

        match h.run(&mut process, &mut session) {
            Err(Interrupt::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.output(), "Welcome to Agent");
    }

    #[test]
    fn test_emits_chunk_events() {
        let h = Harness::new();
        let sink = RecordingSink::new();
        let mut process =
            ScriptedProcess::new(h.clock.clone(), [Step::output("plain text"), Step::Close]);
        let mut session = h.session("fix bug");

        InteractionDriver::new(&h.config, &h.registry, &*h.clock, &sink)
            .run(&mut process, &mut session)
            .unwrap();

        assert!(matches!(
            sink.events().as_slice(),
            [DriveEvent::Chunk {
                kind: OutputKind::Unclassified,
                bytes: 10
            }]
        ));
    }
}
