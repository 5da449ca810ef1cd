//! Internationalization (i18n) module.
//!
//! Built-in texts are embedded JSON files keyed by language code, resolved
//! with dotted keys (`moderation.warning`). English is the fallback.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::Value;
use tracing::warn;

/// Global translation store: LangCode -> Key -> Text
static TRANSLATIONS: OnceLock<HashMap<String, Value>> = OnceLock::new();

/// Default language, matching the groups the bot was written for.
pub const DEFAULT_LANG: &str = "pt";

const FALLBACK_LANG: &str = "en";

/// Load the embedded translations. Safe to call more than once.
pub fn init() {
    TRANSLATIONS.get_or_init(|| {
        let mut map = HashMap::new();
        for (lang, raw) in [("pt", include_str!("pt.json")), ("en", include_str!("en.json"))] {
            match serde_json::from_str(raw) {
                Ok(val) => {
                    map.insert(lang.to_string(), val);
                }
                Err(e) => warn!("Invalid embedded translations for '{}': {}", lang, e),
            }
        }
        map
    });
}

/// Whether a language has translations.
pub fn is_supported(lang: &str) -> bool {
    init();
    TRANSLATIONS.get().is_some_and(|store| store.contains_key(lang))
}

/// Get text for a key in a specific language.
/// Falls back to English, then to the key itself.
pub fn get_text(lang: &str, key: &str) -> String {
    init();
    let Some(store) = TRANSLATIONS.get() else {
        return key.to_string();
    };

    if let Some(text) = store.get(lang).and_then(|val| resolve_key(val, key)) {
        return text;
    }

    if lang != FALLBACK_LANG
        && let Some(text) = store.get(FALLBACK_LANG).and_then(|val| resolve_key(val, key))
    {
        return text;
    }

    key.to_string()
}

fn resolve_key(val: &Value, key: &str) -> Option<String> {
    let mut current = val;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    current.as_str().map(|s| s.to_string())
}
