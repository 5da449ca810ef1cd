//! Configuration module for the linkguard bot.
//!
//! Loads configuration from environment variables (a `.env` file is
//! honoured). Everything is read once at startup.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::detector::{DEFAULT_LINK_PATTERN, DetectorError, LinkDetector};
use crate::i18n;
use crate::moderation::ModerationConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Pattern(#[from] DetectorError),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // Bridge
    pub bridge_url: Url,
    /// Bearer token for the bridge API.
    pub bridge_token: Option<String>,
    pub webhook_addr: SocketAddr,
    /// Expected `X-Bridge-Secret` header on inbound events.
    pub webhook_secret: Option<String>,

    // Storage
    pub strikes_path: PathBuf,

    /// Language for built-in texts.
    pub lang: String,
    pub command_prefix: String,

    pub moderation: ModerationConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bridge_url = get("BRIDGE_URL").ok_or(ConfigError::Missing("BRIDGE_URL"))?;
        let bridge_url = Url::parse(&bridge_url).map_err(|e| ConfigError::Invalid {
            key: "BRIDGE_URL",
            value: bridge_url.clone(),
            reason: e.to_string(),
        })?;

        let webhook_addr = get("WEBHOOK_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let webhook_addr = webhook_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "WEBHOOK_ADDR",
                value: webhook_addr.clone(),
                reason: e.to_string(),
            })?;

        let lang = get("BOT_LANG")
            .map(|l| l.to_lowercase())
            .unwrap_or_else(|| i18n::DEFAULT_LANG.to_string());
        if !i18n::is_supported(&lang) {
            return Err(ConfigError::Invalid {
                key: "BOT_LANG",
                value: lang,
                reason: "supported languages are pt and en".to_string(),
            });
        }

        let defaults = ModerationConfig::for_lang(&lang);

        let link_pattern = get("LINK_PATTERN").unwrap_or_else(|| DEFAULT_LINK_PATTERN.to_string());

        // Parse allow-list (comma-separated)
        let allowlist: Vec<String> = get("ALLOWED_DOMAINS")
            .unwrap_or_default()
            .split(',')
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        // Fail at startup rather than on the first message.
        LinkDetector::new(&link_pattern, &allowlist)?;

        let strike_threshold = match get("STRIKE_THRESHOLD") {
            Some(raw) => parse_positive("STRIKE_THRESHOLD", &raw)?,
            None => defaults.strike_threshold,
        };

        let admins_exempt = match get("ADMINS_EXEMPT") {
            Some(raw) => parse_bool("ADMINS_EXEMPT", &raw)?,
            None => defaults.admins_exempt,
        };

        let gateway_timeout = match get("GATEWAY_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("GATEWAY_TIMEOUT_SECS", &raw)?.into()),
            None => defaults.gateway_timeout,
        };

        let moderation = ModerationConfig {
            link_pattern,
            allowlist,
            strike_threshold,
            admins_exempt,
            warning_template: get("WARNING_TEMPLATE").unwrap_or(defaults.warning_template),
            removal_template: get("REMOVAL_TEMPLATE").unwrap_or(defaults.removal_template),
            gateway_timeout,
        };

        Ok(Self {
            bridge_url,
            bridge_token: get("BRIDGE_TOKEN"),
            webhook_addr,
            webhook_secret: get("WEBHOOK_SECRET"),
            strikes_path: get("STRIKES_PATH")
                .unwrap_or_else(|| "strikes.json".to_string())
                .into(),
            lang,
            command_prefix: get("COMMAND_PREFIX").unwrap_or_else(|| "!".to_string()),
            moderation,
        })
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Err(e) => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
