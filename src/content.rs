//! Structured reading of generated text.

use serde::de::DeserializeOwned;

/// Result of reading generated text as structured content.
///
/// Consumers must handle both variants; there is no silent fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum Generated<T> {
    Parsed(T),
    Unparsed(String),
}

impl<T: DeserializeOwned> Generated<T> {
    /// Parse the first JSON object found in `raw`, ignoring code fences and
    /// any prose around it.
    pub fn parse(raw: &str) -> Self {
        let candidate = json_candidate(raw);
        match candidate.and_then(|c| serde_json::from_str::<T>(c).ok()) {
            Some(value) => Generated::Parsed(value),
            None => Generated::Unparsed(raw.to_string()),
        }
    }
}

impl<T> Generated<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Generated::Parsed(_))
    }

    /// Resolve both variants into a `T`.
    pub fn resolve(self, fallback: impl FnOnce(String) -> T) -> T {
        match self {
            Generated::Parsed(value) => value,
            Generated::Unparsed(raw) => fallback(raw),
        }
    }
}

fn json_candidate(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Strip a surrounding fenced block (```lang ... ```), if present.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.strip_suffix("```").unwrap_or(body).trim()
}
