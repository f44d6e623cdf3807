//! Engine configuration.
//!
//! Every heuristic threshold lives here. The defaults were tuned by hand
//! against one agent's terminal UI and are a starting point, not a contract.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tether_api::OutputKind;
use tether_pump::PatternRegistry;

use crate::error::ConfigError;

/// A user-supplied classifier rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub kind: OutputKind,
    pub regex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-read wait while getting the payload accepted.
    pub scan_timeout_ms: u64,
    /// Empty reads tolerated before injecting the payload unprompted.
    pub idle_reads_before_payload: u32,
    /// Empty reads tolerated before reporting the process as still running.
    pub idle_reads_before_giving_up: u32,
    /// Pause after confirming a repeated paste box.
    pub continuation_settle_ms: u64,
    /// Pause between a payload and its follow-up submit keystroke.
    pub payload_settle_ms: u64,

    /// Completion phase sampling interval.
    pub poll_interval_ms: u64,
    /// Quiet period without the working marker that counts as done.
    pub stability_window_ms: u64,
    /// Regex for the "still working" indicator.
    pub working_marker: String,

    /// Control sequence sent to wind the subprocess down.
    pub cancel_key: String,
    pub cancel_count: u32,
    pub cancel_interval_ms: u64,

    /// Gate-mode read interval. A pending partial line is scanned when a read
    /// of this length comes back empty.
    pub gate_poll_ms: u64,

    pub affirmative: String,
    pub rejection: String,
    /// Bare keystroke that dismisses a prompt.
    pub continuation: String,
    /// Appended to every textual send.
    pub line_ending: String,

    pub strip_ansi: bool,
    pub pty_rows: u16,
    pub pty_cols: u16,

    /// Classifier rules. Empty means the built-in table.
    pub patterns: Vec<PatternSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 5_000,
            idle_reads_before_payload: 5,
            idle_reads_before_giving_up: 10,
            continuation_settle_ms: 2_000,
            payload_settle_ms: 500,
            poll_interval_ms: 100,
            stability_window_ms: 5_000,
            working_marker: r"(?i)esc to interrupt".to_string(),
            cancel_key: "\u{1b}".to_string(),
            cancel_count: 3,
            cancel_interval_ms: 200,
            gate_poll_ms: 250,
            affirmative: "y".to_string(),
            rejection: "n".to_string(),
            continuation: "\r".to_string(),
            line_ending: "\n".to_string(),
            strip_ansi: true,
            pty_rows: 24,
            pty_cols: 120,
            patterns: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from [`EngineConfig::default_path`], or defaults if there is no
    /// file there.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/tether/config.json`, e.g. `~/.config/tether/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tether").join("config.json"))
    }

    pub fn pattern_registry(&self) -> Result<PatternRegistry, ConfigError> {
        if self.patterns.is_empty() {
            return Ok(PatternRegistry::builtin()?);
        }
        Ok(PatternRegistry::from_patterns(
            self.patterns.iter().map(|p| (p.kind, p.regex.as_str())),
        )?)
    }

    pub fn marker_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.working_marker).map_err(ConfigError::Marker)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn continuation_settle(&self) -> Duration {
        Duration::from_millis(self.continuation_settle_ms)
    }

    pub fn payload_settle(&self) -> Duration {
        Duration::from_millis(self.payload_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }

    pub fn cancel_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_interval_ms)
    }

    pub fn gate_poll(&self) -> Duration {
        Duration::from_millis(self.gate_poll_ms)
    }
}
