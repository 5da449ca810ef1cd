//! Link moderation.
//!
//! Watches group messages, deletes those with disallowed links, counts
//! strikes per sender and removes senders who reach the threshold.

mod deletion;
mod locks;
mod policy;

use std::time::Duration;

pub use policy::ModerationPolicy;

use locks::KeyedLocks;

use crate::detector::DEFAULT_LINK_PATTERN;
use crate::i18n;

/// Moderation settings, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Regex used to detect links (case-insensitive).
    pub link_pattern: String,
    /// Domains let through even when a link is detected. Empty = none.
    pub allowlist: Vec<String>,
    /// Strikes that trigger removal. Always at least 1.
    pub strike_threshold: u32,
    /// Whether group admins may post links.
    pub admins_exempt: bool,
    /// Warning text; `{mention}`, `{count}`, `{threshold}`.
    pub warning_template: String,
    /// Notice after a removal; `{mention}`.
    pub removal_template: String,
    /// Bound on each gateway call.
    pub gateway_timeout: Duration,
}

impl ModerationConfig {
    /// Defaults with built-in texts for `lang`.
    pub fn for_lang(lang: &str) -> Self {
        Self {
            link_pattern: DEFAULT_LINK_PATTERN.to_string(),
            allowlist: Vec::new(),
            strike_threshold: 3,
            admins_exempt: true,
            warning_template: i18n::get_text(lang, "moderation.warning"),
            removal_template: i18n::get_text(lang, "moderation.removed"),
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self::for_lang(i18n::DEFAULT_LANG)
    }
}

/// Why a message was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    NotGroup,
    FromSelf,
    BotNotAdmin,
    /// Chat metadata could not be fetched, so roles are unknown.
    MetadataUnavailable,
    NoText,
    NoLink,
    ExemptAdmin,
}

/// What to do with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationDecision {
    Allow(AllowReason),
    DeleteAndWarn,
    DeleteWarnAndRemove,
}

impl ModerationDecision {
    /// Decision for a violation, given the post-increment strike count.
    pub fn for_strikes(count: u32, threshold: u32) -> Self {
        if count >= threshold {
            Self::DeleteWarnAndRemove
        } else {
            Self::DeleteAndWarn
        }
    }

    pub fn removes(self) -> bool {
        matches!(self, Self::DeleteWarnAndRemove)
    }
}
