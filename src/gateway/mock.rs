//! Scripted in-memory gateway for tests.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use super::{ChatGateway, ChatId, ChatMetadata, GatewayError, MessageId, Participant, Role, UserId};

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Delete { message: MessageId, for_everyone: bool },
    Send { chat: ChatId, text: String, mentions: Vec<UserId> },
    Remove { chat: ChatId, users: Vec<UserId> },
}

#[derive(Default)]
pub struct MockGateway {
    pub me: Option<UserId>,
    pub chats: Mutex<HashMap<ChatId, ChatMetadata>>,
    pub calls: Mutex<Vec<Call>>,
    pub metadata_lookups: Mutex<usize>,
    pub reject_delete_for_everyone: bool,
    pub reject_delete_for_me: bool,
    pub reject_send: bool,
    pub reject_remove: bool,
    /// Removal never answers (for timeout tests).
    pub stall_remove: bool,
}

impl MockGateway {
    pub fn new(me: &str) -> Self {
        Self {
            me: Some(UserId::new(me)),
            ..Default::default()
        }
    }

    /// Register a group with `(user, role)` participants.
    pub fn with_group(self, chat: &str, participants: &[(&str, Role)]) -> Self {
        let meta = ChatMetadata {
            id: ChatId::new(chat),
            is_group: true,
            participants: participants
                .iter()
                .map(|(id, role)| Participant { id: UserId::new(*id), role: *role })
                .collect(),
        };
        self.chats.lock().insert(meta.id.clone(), meta);
        self
    }

    /// Change a participant's role, as a promotion or demotion would.
    pub fn set_role(&self, chat: &str, user: &str, role: Role) {
        let user = UserId::new(user);
        if let Some(meta) = self.chats.lock().get_mut(&ChatId::new(chat)) {
            for p in meta.participants.iter_mut().filter(|p| p.id.same_user(&user)) {
                p.role = role;
            }
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn rejected(what: &str) -> GatewayError {
        GatewayError::Rejected {
            status: 403,
            message: format!("{what} rejected"),
        }
    }
}

impl ChatGateway for MockGateway {
    async fn me(&self) -> Result<UserId, GatewayError> {
        self.me
            .clone()
            .ok_or_else(|| GatewayError::NotReady("no session".into()))
    }

    async fn chat_metadata(&self, chat: &ChatId) -> Result<ChatMetadata, GatewayError> {
        *self.metadata_lookups.lock() += 1;
        self.chats
            .lock()
            .get(chat)
            .cloned()
            .ok_or_else(|| GatewayError::Rejected {
                status: 404,
                message: format!("unknown chat {chat}"),
            })
    }

    async fn delete_message(
        &self,
        _chat: &ChatId,
        message: &MessageId,
        for_everyone: bool,
    ) -> Result<(), GatewayError> {
        self.calls.lock().push(Call::Delete {
            message: message.clone(),
            for_everyone,
        });
        if for_everyone && self.reject_delete_for_everyone {
            return Err(Self::rejected("delete for everyone"));
        }
        if !for_everyone && self.reject_delete_for_me {
            return Err(Self::rejected("delete for me"));
        }
        Ok(())
    }

    async fn send_message(
        &self,
        chat: &ChatId,
        text: &str,
        mentions: &[UserId],
    ) -> Result<(), GatewayError> {
        self.calls.lock().push(Call::Send {
            chat: chat.clone(),
            text: text.to_string(),
            mentions: mentions.to_vec(),
        });
        if self.reject_send {
            return Err(Self::rejected("send"));
        }
        Ok(())
    }

    async fn remove_participants(
        &self,
        chat: &ChatId,
        users: &[UserId],
    ) -> Result<(), GatewayError> {
        self.calls.lock().push(Call::Remove {
            chat: chat.clone(),
            users: users.to_vec(),
        });
        if self.stall_remove {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.reject_remove {
            return Err(Self::rejected("remove"));
        }
        if let Some(meta) = self.chats.lock().get_mut(chat) {
            meta.participants.retain(|p| !users.iter().any(|u| p.id.same_user(u)));
        }
        Ok(())
    }
}
