//! Strike commands for group admins.
//!
//! - `!strikes [@user]` shows a user's strikes (the sender's without a mention)
//! - `!resetstrikes @user` clears them

use tracing::info;

use crate::bot::dispatcher::AppState;
use crate::gateway::{ChatGateway, IncomingMessage, UserId, with_timeout};
use crate::i18n::get_text;
use crate::utils::{fill, mention};

/// Handle the strikes command.
pub async fn strikes_command<G: ChatGateway>(
    state: &AppState<G>,
    msg: &IncomingMessage,
) -> anyhow::Result<()> {
    let target = msg.mentions.first().unwrap_or(&msg.sender);
    let who = mention(target);
    let count = state.store.get(target.user()).to_string();
    let threshold = state.policy.config().strike_threshold.to_string();

    let text = fill(
        &get_text(&state.lang, "commands.strikes"),
        &[
            ("mention", who.as_str()),
            ("count", count.as_str()),
            ("threshold", threshold.as_str()),
        ],
    );
    reply(state, msg, &text, target).await
}

/// Handle the resetstrikes command.
pub async fn reset_command<G: ChatGateway>(
    state: &AppState<G>,
    msg: &IncomingMessage,
) -> anyhow::Result<()> {
    let Some(target) = msg.mentions.first() else {
        let text = fill(
            &get_text(&state.lang, "commands.no_target"),
            &[("prefix", state.command_prefix.as_str())],
        );
        return reply(state, msg, &text, &msg.sender).await;
    };

    let existed = state.store.reset(target.user());
    if existed {
        info!("Strikes for {} reset by {} in {}", target, msg.sender, msg.chat_id);
    }

    let key = if existed { "commands.reset" } else { "commands.reset_none" };
    let who = mention(target);
    let text = fill(&get_text(&state.lang, key), &[("mention", who.as_str())]);
    reply(state, msg, &text, target).await
}

async fn reply<G: ChatGateway>(
    state: &AppState<G>,
    msg: &IncomingMessage,
    text: &str,
    mentioned: &UserId,
) -> anyhow::Result<()> {
    with_timeout(
        state.policy.config().gateway_timeout,
        state
            .gateway
            .send_message(&msg.chat_id, text, std::slice::from_ref(mentioned)),
    )
    .await?;
    Ok(())
}
