//! Permission checker with caching.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::{CacheConfig, TypedCache};
use crate::gateway::{ChatGateway, ChatId, ChatMetadata, GatewayError, UserId, with_timeout};

/// Role checker over cached chat metadata.
pub struct Permissions<G: ChatGateway> {
    gateway: Arc<G>,
    cache: TypedCache<ChatId, Arc<ChatMetadata>>,
    /// The bot's own id, learned from the session.
    bot_id: RwLock<Option<UserId>>,
    timeout: Duration,
}

impl<G: ChatGateway> Permissions<G> {
    pub fn new(gateway: Arc<G>, timeout: Duration) -> Self {
        Self {
            gateway,
            cache: TypedCache::new("chat_metadata", CacheConfig::chat_metadata()),
            bot_id: RwLock::new(None),
            timeout,
        }
    }

    /// The bot's user id, asking the gateway on first use.
    pub async fn bot_id(&self) -> Result<UserId, GatewayError> {
        let known = self.bot_id.read().clone();
        if let Some(id) = known {
            return Ok(id);
        }

        let id = with_timeout(self.timeout, self.gateway.me()).await?;
        debug!("Resolved bot id {}", id);
        *self.bot_id.write() = Some(id.clone());
        Ok(id)
    }

    /// Record the bot id reported by a session (re)connect.
    pub fn set_bot_id(&self, id: UserId) {
        *self.bot_id.write() = Some(id);
    }

    /// Get chat metadata, from cache when fresh.
    pub async fn chat(&self, chat: &ChatId) -> Result<Arc<ChatMetadata>, GatewayError> {
        if let Some(cached) = self.cache.get(chat) {
            return Ok(cached);
        }

        debug!("Chat metadata cache miss for {} ({})", chat, self.cache.stats());
        let meta = Arc::new(with_timeout(self.timeout, self.gateway.chat_metadata(chat)).await?);
        self.cache.insert(chat.clone(), meta.clone());
        Ok(meta)
    }

    /// Get chat metadata straight from the gateway, replacing the cached copy.
    pub async fn refresh(&self, chat: &ChatId) -> Result<Arc<ChatMetadata>, GatewayError> {
        self.cache.invalidate(chat);
        self.chat(chat).await
    }

    /// Check if a user is an admin of a group.
    /// Users that are not participants are not admins.
    pub async fn is_admin(&self, chat: &ChatId, user: &UserId) -> Result<bool, GatewayError> {
        Ok(self.chat(chat).await?.is_admin(user))
    }

    /// Check if the bot itself is an admin of a group.
    pub async fn bot_is_admin(&self, chat: &ChatId) -> Result<bool, GatewayError> {
        let me = self.bot_id().await?;
        self.is_admin(chat, &me).await
    }

    /// Drop cached metadata for a chat.
    ///
    /// Call this when membership or roles changed.
    pub fn invalidate(&self, chat: &ChatId) {
        self.cache.invalidate(chat);
        debug!("Invalidated chat metadata cache for {}", chat);
    }
}
