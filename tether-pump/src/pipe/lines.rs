//! Splitting decoded chunks into lines.

/// Accumulates text and hands back complete lines.
///
/// Interactive prompts usually end without a newline, so the unterminated
/// remainder stays reachable through [`LineAssembler::take_partial`].
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line it completed, without the newline.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);

        let Some(last_newline) = self.partial.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .strip_suffix('\n')
            .unwrap_or(&complete)
            .split('\n')
            .map(str::to_string)
            .collect()
    }

    /// Remove and return the unterminated tail, if there is one.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}
