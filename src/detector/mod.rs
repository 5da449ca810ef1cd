//! Link detection.
//!
//! Classifies a message body as containing a disallowed link. The check is
//! pure: a compiled pattern plus an allow-list of domains, no I/O.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Built-in link pattern.
///
/// Matches `http(s)://` URLs, `www.` tokens and bare domains ending in one of
/// the known top-level labels, optionally followed by a path.
pub const DEFAULT_LINK_PATTERN: &str =
    r"\b((https?://|www\.)[^\s<>()]+|[^\s<>()]+\.(com|net|org|io|gov|edu|app|br)(/[^\s<>()]*)?)\b";

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid link pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Compiled link detector.
#[derive(Debug, Clone)]
pub struct LinkDetector {
    pattern: Regex,
    /// Lowercased allow-listed domains.
    allowlist: Vec<String>,
}

impl LinkDetector {
    /// Compile a detector from a pattern and an allow-list.
    ///
    /// The pattern is always matched case-insensitively.
    pub fn new<I, S>(pattern: &str, allowlist: I) -> Result<Self, DetectorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| DetectorError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        let allowlist = allowlist
            .into_iter()
            .map(|d| d.as_ref().trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Ok(Self {
            pattern: regex,
            allowlist,
        })
    }

    /// Allow-listed domains (lowercased).
    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }

    /// Check whether `text` contains a link that should be blocked.
    pub fn is_blocked(&self, text: Option<&str>) -> bool {
        is_blocked_link(&self.pattern, text, self.allowlist.as_slice())
    }
}

/// Check `text` against `pattern`, honouring the allow-list.
///
/// Missing or empty text is never blocked. With an empty allow-list every
/// match is blocked; otherwise a match is let through when the text contains
/// any allow-listed domain, case-insensitively.
pub fn is_blocked_link<S: AsRef<str>>(pattern: &Regex, text: Option<&str>, allowlist: &[S]) -> bool {
    let text = match text {
        Some(t) if !t.is_empty() => t,
        _ => return false,
    };

    if !pattern.is_match(text) {
        return false;
    }

    if allowlist.is_empty() {
        return true;
    }

    let lower = text.to_lowercase();
    !allowlist
        .iter()
        .any(|domain| lower.contains(&domain.as_ref().to_lowercase()))
}
