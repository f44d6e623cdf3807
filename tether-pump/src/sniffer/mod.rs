//! Output sniffing - classify subprocess output against known UI patterns.

use regex::Regex;
use tether_api::OutputKind;

/// Error building a pattern registry.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("invalid pattern for {kind}: {source}")]
    InvalidRegex {
        kind: OutputKind,
        #[source]
        source: regex::Error,
    },

    #[error("{0} cannot be used as a pattern kind")]
    Unmatchable(OutputKind),
}

/// Built-in matchers for chat-style agent terminal UIs.
///
/// `PasteInputBox` looks for the cursor inside a drawn box (`│ >`), which a
/// bare `>` line never contains.
pub const BUILTIN_PATTERNS: &[(OutputKind, &str)] = &[
    (OutputKind::PasteInputBox, r"│\s*>"),
    (
        OutputKind::YesNoPrompt,
        r"(?i)\((?:y/n|yes/no)\)|\[(?:y/n)\]|do you want to (?:proceed|continue)\?",
    ),
    (OutputKind::HumanPrefix, r"(?m)^\s*Human:\s*$"),
    (OutputKind::PromptPrefix, r"(?m)^\s*❯\s*$|\? for shortcuts"),
    (OutputKind::FullScreenBanner, r"(?im)\bwelcome to\b|✻|^\s*╭─{8,}╮\s*$"),
    (OutputKind::BareCursor, r"(?m)^\s*>\s*$"),
];

/// Matching priority. Lower wins when several rules match one chunk.
pub fn priority(kind: OutputKind) -> u8 {
    match kind {
        OutputKind::PasteInputBox => 0,
        OutputKind::YesNoPrompt => 1,
        OutputKind::HumanPrefix => 2,
        OutputKind::PromptPrefix => 3,
        OutputKind::FullScreenBanner => 4,
        OutputKind::BareCursor => 5,
        OutputKind::Unclassified => u8::MAX,
    }
}

/// One recognizable subprocess state.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub kind: OutputKind,
    pub matcher: Regex,
}

impl PatternRule {
    pub fn new(kind: OutputKind, pattern: &str) -> Result<Self, PatternError> {
        if kind == OutputKind::Unclassified {
            return Err(PatternError::Unmatchable(kind));
        }
        let matcher =
            Regex::new(pattern).map_err(|source| PatternError::InvalidRegex { kind, source })?;
        Ok(Self { kind, matcher })
    }

    pub fn is_match(&self, chunk: &str) -> bool {
        self.matcher.is_match(chunk)
    }
}

/// Ordered rule table.
///
/// Rules are kept sorted by [`priority`] no matter what order they were
/// supplied in. Rules of the same kind keep their relative order.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    rules: Vec<PatternRule>,
}

impl PatternRegistry {
    pub fn new(mut rules: Vec<PatternRule>) -> Self {
        rules.sort_by_key(|rule| priority(rule.kind));
        Self { rules }
    }

    /// Compile `(kind, regex)` pairs into a registry.
    pub fn from_patterns<'a, I>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = (OutputKind, &'a str)>,
    {
        let rules = patterns
            .into_iter()
            .map(|(kind, pattern)| PatternRule::new(kind, pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// The built-in table.
    pub fn builtin() -> Result<Self, PatternError> {
        Self::from_patterns(BUILTIN_PATTERNS.iter().copied())
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Classify a chunk: the first rule in priority order that matches.
    pub fn classify(&self, chunk: &str) -> OutputKind {
        self.rules
            .iter()
            .find(|rule| rule.is_match(chunk))
            .map(|rule| rule.kind)
            .unwrap_or(OutputKind::Unclassified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PatternRegistry {
        PatternRegistry::builtin().unwrap()
    }

    #[test]
    fn test_builtin_patterns_compile_in_priority_order() {
        let kinds: Vec<_> = registry().rules().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OutputKind::PasteInputBox,
                OutputKind::YesNoPrompt,
                OutputKind::HumanPrefix,
                OutputKind::PromptPrefix,
                OutputKind::FullScreenBanner,
                OutputKind::BareCursor,
            ]
        );
    }

    #[test]
    fn test_banner_and_cursor() {
        let registry = registry();
        assert_eq!(registry.classify("Welcome to Agent"), OutputKind::FullScreenBanner);
        assert_eq!(registry.classify("✻ Welcome to Agent!"), OutputKind::FullScreenBanner);
        assert_eq!(registry.classify("> "), OutputKind::BareCursor);
        assert_eq!(registry.classify("some output\n>\n"), OutputKind::BareCursor);
    }

    #[test]
    fn test_yes_no_prompts() {
        let registry = registry();
        assert_eq!(registry.classify("Overwrite file? (y/n)"), OutputKind::YesNoPrompt);
        assert_eq!(registry.classify("Continue [Y/n]"), OutputKind::YesNoPrompt);
        assert_eq!(registry.classify("Do you want to proceed?"), OutputKind::YesNoPrompt);
    }

    #[test]
    fn test_prefixes() {
        let registry = registry();
        assert_eq!(registry.classify("Human: "), OutputKind::HumanPrefix);
        assert_eq!(registry.classify("  ? for shortcuts"), OutputKind::PromptPrefix);
        assert_eq!(registry.classify("❯ "), OutputKind::PromptPrefix);
    }

    #[test]
    fn test_paste_box_beats_banner() {
        let chunk = "╭──────────────────╮\n│ > Welcome to the prompt │\n╰──────────────────╯";
        assert_eq!(registry().classify(chunk), OutputKind::PasteInputBox);
    }

    #[test]
    fn test_yes_no_beats_cursor() {
        assert_eq!(registry().classify("Apply changes? (y/n)\n> "), OutputKind::YesNoPrompt);
    }

    #[test]
    fn test_unclassified() {
        let registry = registry();
        assert_eq!(registry.classify("Reading src/main.rs"), OutputKind::Unclassified);
        assert_eq!(registry.classify("a > b"), OutputKind::Unclassified);
    }

    #[test]
    fn test_supplied_order_is_normalized() {
        let registry = PatternRegistry::from_patterns([
            (OutputKind::BareCursor, r">"),
            (OutputKind::YesNoPrompt, r"\?"),
        ])
        .unwrap();
        assert_eq!(registry.classify("ok? >"), OutputKind::YesNoPrompt);
    }

    #[test]
    fn test_invalid_and_unmatchable_patterns() {
        assert!(matches!(
            PatternRule::new(OutputKind::BareCursor, "("),
            Err(PatternError::InvalidRegex { kind: OutputKind::BareCursor, .. })
        ));
        assert!(matches!(
            PatternRule::new(OutputKind::Unclassified, "x"),
            Err(PatternError::Unmatchable(_))
        ));
    }
}
