//! Telegram upstream: Bot-API style HTTP client.
//!
//! Speaks the `{ok, result, error_code, description, parameters}` envelope.
//! `getChat` and `forwardMessage` are standard Bot API methods;
//! `getChatHistory` and `getChatMessage` are served by the history gateway
//! the relay is deployed against (point `RELAY_API_URL` at it).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::UpstreamError;
use crate::upstream::{ChannelRef, Entity, MediaKind, RawMessage, UpstreamClient};

/// HTTP client for a Telegram Bot-API compatible endpoint.
pub struct TelegramUpstream {
    base_url: String,
    token: SecretString,
    client: reqwest::Client,
}

impl TelegramUpstream {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.base_url,
            self.token.expose_secret()
        )
    }

    /// POST a method call and unwrap the response envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, UpstreamError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::Request(format!("{method}: {}", e.without_url())))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| UpstreamError::Request(format!("{method}: {}", e.without_url())))?;

        let envelope: ApiResponse<T> = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                UpstreamError::InvalidResponse(format!("{method}: {e}"))
            } else {
                classify(status.as_u16(), &text, None)
            }
        })?;

        if envelope.ok {
            return envelope
                .result
                .ok_or_else(|| UpstreamError::InvalidResponse(format!("{method}: missing result")));
        }

        let code = envelope.error_code.unwrap_or(status.as_u16());
        let description = envelope.description.unwrap_or_default();
        let retry_after = envelope.parameters.and_then(|p| p.retry_after);
        debug!(method, code, description = %description, "Upstream call failed");
        Err(classify(code, &description, retry_after))
    }
}

/// Map an error code/description pair to the relay's error taxonomy.
fn classify(code: u16, description: &str, retry_after: Option<u64>) -> UpstreamError {
    if code == 429 || retry_after.is_some() {
        return UpstreamError::FloodWait {
            seconds: retry_after.unwrap_or(1),
        };
    }
    let lower = description.to_lowercase();
    match code {
        403 => UpstreamError::Forbidden(description.to_string()),
        400 | 404 if lower.contains("not found") => UpstreamError::NotFound(description.to_string()),
        _ => UpstreamError::Request(format!("{code}: {description}")),
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatDto {
    id: i64,
    title: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDto {
    message_id: i64,
    text: Option<String>,
    caption: Option<String>,
    photo: Option<serde_json::Value>,
    video: Option<serde_json::Value>,
    document: Option<serde_json::Value>,
    audio: Option<serde_json::Value>,
    voice: Option<serde_json::Value>,
    poll: Option<serde_json::Value>,
}

impl From<MessageDto> for RawMessage {
    fn from(dto: MessageDto) -> Self {
        let present = |v: &Option<serde_json::Value>| v.as_ref().is_some_and(|v| !v.is_null());
        let media = [
            (present(&dto.photo), MediaKind::Photo),
            (present(&dto.video), MediaKind::Video),
            (present(&dto.document), MediaKind::Document),
            (present(&dto.audio), MediaKind::Audio),
            (present(&dto.voice), MediaKind::Voice),
            (present(&dto.poll), MediaKind::Poll),
        ]
        .into_iter()
        .find_map(|(has, kind)| has.then_some(kind));

        Self {
            id: dto.message_id,
            text: dto.text,
            caption: dto.caption,
            media,
        }
    }
}

#[async_trait]
impl UpstreamClient for TelegramUpstream {
    async fn get_entity(&self, channel: &ChannelRef) -> Result<Entity, UpstreamError> {
        let chat: ChatDto = self
            .call("getChat", serde_json::json!({ "chat_id": channel.to_chat_id() }))
            .await?;
        Ok(Entity {
            id: chat.id,
            title: chat.title,
            username: chat.username,
        })
    }

    async fn get_messages(
        &self,
        entity: &Entity,
        limit: usize,
    ) -> Result<Vec<RawMessage>, UpstreamError> {
        let messages: Vec<MessageDto> = self
            .call(
                "getChatHistory",
                serde_json::json!({ "chat_id": entity.id, "limit": limit }),
            )
            .await?;
        Ok(messages.into_iter().map(RawMessage::from).collect())
    }

    async fn get_message(
        &self,
        entity: &Entity,
        message_id: i64,
    ) -> Result<Option<RawMessage>, UpstreamError> {
        let result: Result<MessageDto, _> = self
            .call(
                "getChatMessage",
                serde_json::json!({ "chat_id": entity.id, "message_id": message_id }),
            )
            .await;
        match result {
            Ok(dto) => Ok(Some(dto.into())),
            Err(UpstreamError::NotFound(desc)) if desc.to_lowercase().contains("message") => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn forward_message(
        &self,
        target: &Entity,
        source: &Entity,
        message_id: i64,
    ) -> Result<(), UpstreamError> {
        let _: serde_json::Value = self
            .call(
                "forwardMessage",
                serde_json::json!({
                    "chat_id": target.id,
                    "from_chat_id": source.id,
                    "message_id": message_id,
                }),
            )
            .await?;
        Ok(())
    }
}
