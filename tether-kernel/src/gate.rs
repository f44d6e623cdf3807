//! Gate mode: answering configured confirmation prompts.
//!
//! A rule only fires affirmatively once all of its criteria have shown up in
//! earlier output. Anything else that matches gets the rejection.

use tether_api::{ConfirmationRule, DriveEvent, Input, Phase};
use tether_pump::{LineAssembler, PatternRegistry};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Interrupt;
use crate::process::{ControlledProcess, ReadOutcome};
use crate::session::Session;
use crate::sink::EventSink;

/// What to do about a line that matched a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision<'r> {
    pub rule: &'r ConfirmationRule,
    pub criteria_met: bool,
}

impl<'r> GateDecision<'r> {
    /// The text to send back.
    pub fn reply<'a>(&'a self, rejection: &'a str) -> &'a str {
        if self.criteria_met {
            &self.rule.response
        } else {
            rejection
        }
    }
}

/// Whether every criterion occurs somewhere in `buffer`.
pub fn criteria_met(buffer: &str, criteria: &[String]) -> bool {
    criteria.iter().all(|c| buffer.contains(c.as_str()))
}

/// Match `line` against `rules`, checking criteria against `buffer`, the
/// output seen before this line. The first matching rule wins.
pub fn evaluate<'r>(
    rules: &'r [ConfirmationRule],
    buffer: &str,
    line: &str,
) -> Option<GateDecision<'r>> {
    rules
        .iter()
        .find(|rule| !rule.pattern.is_empty() && line.contains(rule.pattern.as_str()))
        .map(|rule| GateDecision {
            rule,
            criteria_met: criteria_met(buffer, &rule.criteria),
        })
}

pub(crate) struct Gate<'a> {
    config: &'a EngineConfig,
    registry: &'a PatternRegistry,
    clock: &'a dyn Clock,
    sink: &'a dyn EventSink,
}

impl<'a> Gate<'a> {
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

    /// Scan lines until the subprocess closes its output.
    pub(crate) fn run(
        &self,
        process: &mut dyn ControlledProcess,
        session: &mut Session,
        rules: &[ConfirmationRule],
    ) -> Result<(), Interrupt> {
        self.sink.emit(&DriveEvent::PhaseChanged { phase: Phase::Gate });
        let mut lines = LineAssembler::new();

        loop {
            let Some(remaining) = session.remaining(self.clock.now()) else {
                return Err(Interrupt::Deadline);
            };

            match process.next_chunk(self.config.gate_poll().min(remaining))? {
                ReadOutcome::Data(text) => {
                    for line in lines.push(&text) {
                        self.scan(process, session, rules, &line)?;
                    }
                }
                ReadOutcome::Timeout => {
                    // Prompts usually wait on an unterminated line.
                    if let Some(partial) = lines.take_partial() {
                        self.scan(process, session, rules, &partial)?;
                    }
                }
                ReadOutcome::Closed => {
                    // Nobody is left to answer a trailing prompt.
                    if let Some(partial) = lines.take_partial() {
                        session.append_line(&partial);
                    }
                    if session.is_expired(self.clock.now()) || process.deadline_fired() {
                        return Err(Interrupt::Deadline);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn scan(
        &self,
        process: &mut dyn ControlledProcess,
        session: &mut Session,
        rules: &[ConfirmationRule],
        line: &str,
    ) -> Result<(), Interrupt> {
        self.sink.emit(&DriveEvent::Chunk {
            kind: self.registry.classify(line),
            bytes: line.len(),
        });

        let decision = evaluate(rules, session.output(), line);
        session.append_line(line);

        let Some(decision) = decision else {
            return Ok(());
        };
        self.sink.emit(&DriveEvent::GateDecision {
            pattern: decision.rule.pattern.clone(),
            criteria_met: decision.criteria_met,
        });

        process.send_line(decision.reply(&self.config.rejection), &self.config.line_ending)?;
        let input = if decision.criteria_met {
            Input::Response(decision.rule.response.clone())
        } else {
            Input::Rejection
        };
        self.sink.emit(&DriveEvent::Sent { input });
        Ok(())
    }
}
