// Debug hints: the free-form `debug` context value, e.g. `api=sync,stats=yes`.

use std::collections::BTreeMap;

use crate::error::{ClassinetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// Issue every request at once and wait on the completion barrier.
    Async,
    /// One blocking call per file.
    Sync,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugHints {
    hints: BTreeMap<String, String>,
}

impl DebugHints {
    /// Entries are separated by `,` or `;`, keys from values by `=` or `:`.
    /// An entry without a value counts as `yes`.
    pub fn parse(text: &str) -> Self {
        let hints = text
            .split(|c: char| c == ',' || c == ';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(|c: char| c == '=' || c == ':') {
                Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
                None => (entry.to_string(), "yes".to_string()),
            })
            .collect();
        DebugHints { hints }
    }

    pub fn get(&self, key: &str) -> &str {
        self.hints.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn stats(&self) -> bool {
        self.get("stats") == "yes"
    }

    pub fn api(&self) -> Result<ApiMode> {
        match self.get("api") {
            "" | "async" | "a" | "ac" | "cpp" | "c++" | "a_cpp" | "acpp" => Ok(ApiMode::Async),
            "sync" | "s" | "sc" | "s_cpp" | "s_c++" | "scpp" => Ok(ApiMode::Sync),
            other => Err(ClassinetError::InvalidArgument(format!(
                "Unknown api option: {}",
                other
            ))),
        }
    }
}
