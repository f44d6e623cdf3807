//! Engine error types.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SpawnFailed,
    Timeout,
    Io,
}

/// A failed invocation.
///
/// Everything except `SpawnFailed` carries the output captured before the
/// failure.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("failed to spawn `{command}`: {message}")]
    SpawnFailed { command: String, message: String },

    #[error("deadline of {}s elapsed before the session finished", timeout.as_secs())]
    Timeout { timeout: Duration, output: String },

    #[error("subprocess i/o failed: {source}")]
    Io {
        #[source]
        source: io::Error,
        output: String,
    },
}

impl DriveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriveError::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            DriveError::Timeout { .. } => ErrorKind::Timeout,
            DriveError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Output captured before the failure.
    pub fn output(&self) -> &str {
        match self {
            DriveError::SpawnFailed { .. } => "",
            DriveError::Timeout { output, .. } | DriveError::Io { output, .. } => output,
        }
    }

    pub fn into_output(self) -> String {
        match self {
            DriveError::SpawnFailed { .. } => String::new(),
            DriveError::Timeout { output, .. } | DriveError::Io { output, .. } => output,
        }
    }
}

/// Why a driver loop stopped early. Converted to [`DriveError`] once the
/// session's output can be attached.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Deadline,
    Io(io::Error),
}

impl From<io::Error> for Interrupt {
    fn from(e: io::Error) -> Self {
        Interrupt::Io(e)
    }
}

impl Interrupt {
    pub(crate) fn into_error(self, timeout: Duration, output: String) -> DriveError {
        match self {
            Interrupt::Deadline => DriveError::Timeout { timeout, output },
            Interrupt::Io(source) => DriveError::Io { source, output },
        }
    }
}

/// Errors loading an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Pattern(#[from] tether_pump::PatternError),

    #[error("invalid working marker: {0}")]
    Marker(#[source] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_output_survives_errors() {
        let err = Interrupt::Deadline.into_error(Duration::from_secs(1), "partial".into());
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.output(), "partial");
        assert_eq!(err.to_string(), "deadline of 1s elapsed before the session finished");

        let err = Interrupt::from(io::Error::from(io::ErrorKind::BrokenPipe))
            .into_error(Duration::from_secs(1), "so far".into());
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.into_output(), "so far");
    }

    #[test]
    fn test_spawn_failure_has_no_output() {
        let err = DriveError::SpawnFailed {
            command: "claude".into(),
            message: "not found".into(),
        };
        assert_eq!(err.kind(), ErrorKind::SpawnFailed);
        assert_eq!(err.output(), "");
        assert_eq!(err.to_string(), "failed to spawn `claude`: not found");
    }
}
