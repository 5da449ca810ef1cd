//! Plugin system for command handlers.
//!
//! Add new plugins by:
//! 1. Creating a new file in this directory
//! 2. Adding `pub mod your_plugin;` below
//! 3. Adding the command to `Command` and `handle_command()`

pub mod strikes;

use tracing::debug;

use crate::bot::dispatcher::AppState;
use crate::gateway::{ChatGateway, IncomingMessage};

/// All bot commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Show a user's strikes.
    Strikes,
    /// Clear a user's strikes.
    ResetStrikes,
}

impl Command {
    /// Parse `<prefix><name> ...`. Names are case-insensitive.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let rest = text.trim_start().strip_prefix(prefix)?;
        let name = rest.split_whitespace().next()?;

        match name.to_lowercase().as_str() {
            "strikes" => Some(Self::Strikes),
            "resetstrikes" => Some(Self::ResetStrikes),
            _ => None,
        }
    }
}

/// Run a command if the message is one a group admin sent.
///
/// Returns `true` when the message was consumed. Anything else, including
/// commands from non-admins and commands carrying a link when admins are
/// not exempt, goes on to moderation.
pub async fn handle_command<G: ChatGateway>(
    state: &AppState<G>,
    msg: &IncomingMessage,
) -> anyhow::Result<bool> {
    if msg.from_me || !msg.chat_id.is_group() {
        return Ok(false);
    }

    let Some(text) = msg.text() else {
        return Ok(false);
    };
    let Some(command) = Command::parse(text, &state.command_prefix) else {
        return Ok(false);
    };

    // A command is no way around the link rules for admins who aren't exempt.
    if !state.policy.config().admins_exempt && state.policy.blocks(text) {
        debug!("{:?} from {} carries a link, moderating it instead", command, msg.sender);
        return Ok(false);
    }

    if !state.permissions.bot_is_admin(&msg.chat_id).await.unwrap_or(false) {
        return Ok(false);
    }

    if !state.permissions.is_admin(&msg.chat_id, &msg.sender).await.unwrap_or(false) {
        debug!("Ignoring {:?} from non-admin {}", command, msg.sender);
        return Ok(false);
    }

    match command {
        Command::Strikes => strikes::strikes_command(state, msg).await?,
        Command::ResetStrikes => strikes::reset_command(state, msg).await?,
    }
    Ok(true)
}
