//! Per-invocation state.

use std::time::{Duration, Instant};

/// State for one invocation. Owned by whichever driver is active.
#[derive(Debug)]
pub struct Session {
    payload: String,
    pub(crate) payload_sent: bool,
    pub(crate) continuation_sent: bool,
    pub(crate) consecutive_empty_reads: u32,
    output: String,
    lines: usize,
    /// `None` when the timeout is too large to represent.
    deadline: Option<Instant>,
    timeout: Duration,
}

impl Session {
    pub fn new(payload: impl Into<String>, started: Instant, timeout: Duration) -> Self {
        Self {
            payload: payload.into(),
            payload_sent: false,
            continuation_sent: false,
            consecutive_empty_reads: 0,
            output: String::new(),
            lines: 0,
            deadline: started.checked_add(timeout),
            timeout,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn payload_sent(&self) -> bool {
        self.payload_sent
    }

    pub fn continuation_sent(&self) -> bool {
        self.continuation_sent
    }

    pub fn consecutive_empty_reads(&self) -> u32 {
        self.consecutive_empty_reads
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the deadline, or `None` once it has passed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.deadline {
            Some(deadline) => deadline
                .checked_duration_since(now)
                .filter(|left| !left.is_zero()),
            None => Some(Duration::MAX),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.remaining(now).is_none()
    }

    pub fn append(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Append a scanned line, newline-separated from what came before.
    pub fn append_line(&mut self, line: &str) {
        if self.lines > 0 {
            self.output.push('\n');
        }
        self.output.push_str(line);
        self.lines += 1;
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }
}
