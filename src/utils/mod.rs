//! Utility functions.
//!
//! Collection of helper functions used across the bot.

use crate::gateway::UserId;

/// Replace `{name}` placeholders in a template.
///
/// Unknown placeholders are left as they are.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

/// Inline mention text for a user. The gateway turns it into a real mention
/// when the user is also passed in the message's mention list.
pub fn mention(user: &UserId) -> String {
    format!("@{}", user.user())
}
