//! HTTP client for the WhatsApp bridge sidecar.
//!
//! The bridge owns the WhatsApp Web session and exposes a small JSON API:
//!
//! - `GET  /me`
//! - `GET  /chats/{chat}`
//! - `POST /chats/{chat}/messages`                  `{"text", "mentions"}`
//! - `POST /chats/{chat}/messages/{msg}/delete`     `{"for_everyone"}`
//! - `POST /chats/{chat}/participants/remove`       `{"participants"}`

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{ChatGateway, ChatId, ChatMetadata, GatewayError, MessageId, UserId};

/// Gateway implementation backed by the bridge's HTTP API.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: Client,
    base: Url,
    token: Option<String>,
}

#[derive(Deserialize)]
struct MeResponse {
    id: UserId,
}

#[derive(Serialize)]
struct SendBody<'a> {
    text: &'a str,
    mentions: &'a [UserId],
}

#[derive(Serialize)]
struct DeleteBody {
    for_everyone: bool,
}

#[derive(Serialize)]
struct RemoveBody<'a> {
    participants: &'a [UserId],
}

impl BridgeClient {
    /// Create a client for the bridge at `base`.
    ///
    /// `timeout` bounds each HTTP request on top of the caller's own bound.
    pub fn new(base: Url, token: Option<String>, timeout: Duration) -> Result<Self, GatewayError> {
        if base.cannot_be_a_base() {
            return Err(GatewayError::NotReady(format!("invalid bridge URL {base}")));
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base, token })
    }

    /// Build an endpoint URL; ids are percent-encoded as path segments.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

impl ChatGateway for BridgeClient {
    async fn me(&self) -> Result<UserId, GatewayError> {
        let url = self.endpoint(&["me"]);
        let me: MeResponse = self.execute(self.http.get(url)).await?.json().await?;
        Ok(me.id)
    }

    async fn chat_metadata(&self, chat: &ChatId) -> Result<ChatMetadata, GatewayError> {
        let url = self.endpoint(&["chats", chat.as_str()]);
        debug!("Fetching chat metadata for {}", chat);
        Ok(self.execute(self.http.get(url)).await?.json().await?)
    }

    async fn delete_message(
        &self,
        chat: &ChatId,
        message: &MessageId,
        for_everyone: bool,
    ) -> Result<(), GatewayError> {
        let url = self.endpoint(&["chats", chat.as_str(), "messages", message.as_str(), "delete"]);
        self.execute(self.http.post(url).json(&DeleteBody { for_everyone }))
            .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        chat: &ChatId,
        text: &str,
        mentions: &[UserId],
    ) -> Result<(), GatewayError> {
        let url = self.endpoint(&["chats", chat.as_str(), "messages"]);
        self.execute(self.http.post(url).json(&SendBody { text, mentions }))
            .await?;
        Ok(())
    }

    async fn remove_participants(
        &self,
        chat: &ChatId,
        users: &[UserId],
    ) -> Result<(), GatewayError> {
        let url = self.endpoint(&["chats", chat.as_str(), "participants", "remove"]);
        self.execute(self.http.post(url).json(&RemoveBody { participants: users }))
            .await?;
        Ok(())
    }
}
