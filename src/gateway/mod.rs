//! Chat gateway - the messaging client the bot drives.
//!
//! The WhatsApp session itself runs in a bridge process. This module defines
//! the operations the bot needs from it ([`ChatGateway`]) and the event and
//! metadata types exchanged with it.

mod bridge;
#[cfg(test)]
pub mod mock;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bridge::BridgeClient;

/// Suffix of group conversation ids.
const GROUP_SUFFIX: &str = "@g.us";

macro_rules! serialized_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

serialized_id!(
    /// Serialized conversation id (`...@g.us` for groups).
    ChatId
);
serialized_id!(
    /// Serialized user id (`<number>@c.us`).
    UserId
);
serialized_id!(
    /// Serialized message id, opaque to the bot.
    MessageId
);

impl ChatId {
    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }
}

impl UserId {
    /// The user part of the id (the phone number for `@c.us` ids).
    pub fn user(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(user, _)| user)
    }

    /// Same account, ignoring the server suffix.
    pub fn same_user(&self, other: &UserId) -> bool {
        self.user() == other.user()
    }
}

/// Role of a participant in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Admin,
    #[serde(alias = "super_admin")]
    SuperAdmin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    #[serde(default)]
    pub role: Role,
}

/// Conversation metadata as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub id: ChatId,
    pub is_group: bool,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl ChatMetadata {
    /// Find a participant by user, ignoring the server suffix.
    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id.same_user(user))
    }

    /// Whether `user` is an admin here. Unknown users are not.
    pub fn is_admin(&self, user: &UserId) -> bool {
        self.participant(user).is_some_and(|p| p.role.is_admin())
    }
}

/// A message as delivered by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    /// Author of the message (the participant, not the group).
    pub sender: UserId,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncomingMessage {
    /// Trimmed body, `None` when there is no text.
    pub fn text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Age of the message, when the bridge reported a timestamp.
    pub fn age(&self) -> Option<chrono::Duration> {
        self.timestamp.map(|ts| Utc::now() - ts)
    }
}

/// Events pushed by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// The session needs pairing; the bridge shows the QR code.
    Qr { qr: String },
    /// The session is connected as `me`.
    Ready { me: UserId },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    Message(IncomingMessage),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("bridge request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bridge rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("bridge call timed out after {0:?}")]
    Timeout(Duration),

    #[error("bridge not ready: {0}")]
    NotReady(String),
}

/// Operations the bot needs from the messaging client.
pub trait ChatGateway: Send + Sync + 'static {
    /// The bot's own user id.
    fn me(&self) -> impl Future<Output = Result<UserId, GatewayError>> + Send;

    fn chat_metadata(
        &self,
        chat: &ChatId,
    ) -> impl Future<Output = Result<ChatMetadata, GatewayError>> + Send;

    /// Delete a message, for all participants or only for the bot.
    fn delete_message(
        &self,
        chat: &ChatId,
        message: &MessageId,
        for_everyone: bool,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn send_message(
        &self,
        chat: &ChatId,
        text: &str,
        mentions: &[UserId],
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn remove_participants(
        &self,
        chat: &ChatId,
        users: &[UserId],
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Bound a gateway call; expiry becomes [`GatewayError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(limit)),
    }
}
