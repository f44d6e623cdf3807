//! Output classification and the result of a driven invocation.

use serde::{Deserialize, Serialize};

/// Recognizable UI states of the driven subprocess.
///
/// The declaration order is not the matching order; priority lives in the
/// pattern registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    /// A yes/no confirmation question, e.g. `Proceed? (y/n)`.
    YesNoPrompt,
    /// A boxed, paste-style input area.
    PasteInputBox,
    /// A full-screen welcome or status banner.
    FullScreenBanner,
    /// A bare `>` input cursor on its own line.
    BareCursor,
    /// A `Human:` turn prefix.
    HumanPrefix,
    /// An agent-specific prompt glyph or shortcut hint.
    PromptPrefix,
    /// Nothing in the registry matched.
    Unclassified,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::YesNoPrompt => "yes-no-prompt",
            OutputKind::PasteInputBox => "paste-input-box",
            OutputKind::FullScreenBanner => "full-screen-banner",
            OutputKind::BareCursor => "bare-cursor",
            OutputKind::HumanPrefix => "human-prefix",
            OutputKind::PromptPrefix => "prompt-prefix",
            OutputKind::Unclassified => "unclassified",
        }
    }

    /// Kinds that indicate the subprocess is waiting at an input prompt.
    pub fn is_input_ready(&self) -> bool {
        matches!(
            self,
            OutputKind::FullScreenBanner
                | OutputKind::BareCursor
                | OutputKind::HumanPrefix
                | OutputKind::PromptPrefix
        )
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a successful invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveStatus {
    /// The subprocess went idle (or closed its output) and was reclaimed.
    Completed,
    /// Phase 1 gave up waiting on a silent subprocess. The string is the
    /// diagnostic explaining why.
    StillRunning(String),
}

/// Captured output of a driven invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveOutput {
    pub status: DriveStatus,
    /// Everything the subprocess printed, normalized, in arrival order.
    pub text: String,
}

impl DriveOutput {
    pub fn completed(text: String) -> Self {
        Self {
            status: DriveStatus::Completed,
            text,
        }
    }

    pub fn still_running(text: String, diagnostic: impl Into<String>) -> Self {
        Self {
            status: DriveStatus::StillRunning(diagnostic.into()),
            text,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == DriveStatus::Completed
    }
}
