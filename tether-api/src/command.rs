//! Invocation inputs supplied by collaborators.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timeout applied when a command spec carries a non-positive timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// The subprocess to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overall deadline in seconds. Zero or negative means the default.
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: 0,
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout_secs(mut self, secs: i64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The deadline this spec asks for, with non-positive values defaulted.
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout <= 0 {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout as u64)
        }
    }

    /// Program and arguments joined for display.
    pub fn display_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A gate-mode answer to a recognizable confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRule {
    /// Substring looked for in each output line.
    pub pattern: String,
    /// Sent when the pattern matches and every criterion has been seen.
    pub response: String,
    /// Substrings that must all appear in earlier output.
    #[serde(default)]
    pub criteria: Vec<String>,
}

impl ConfirmationRule {
    pub fn new(pattern: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            response: response.into(),
            criteria: Vec::new(),
        }
    }

    pub fn requires(mut self, criterion: impl Into<String>) -> Self {
        self.criteria.push(criterion.into());
        self
    }
}
