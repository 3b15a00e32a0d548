//! Chat-platform message sink (external collaborator). The only concrete
//! implementation is a minimal Discord REST client in the same idiom as the
//! WebDriver client in `auth::selenium`: hand-rolled endpoints over
//! `reqwest`, not a full client-library dependency.

use crate::core::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Opaque reference to a previously-sent message, reusable for in-place edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub String);

#[derive(Debug, Clone)]
pub struct RecentMessage {
    pub handle: MessageHandle,
    pub author_id: String,
    pub created_at_ms: i64,
    pub text: String,
}

/// Maximum code points the sink accepts per message (Discord's limit).
pub const MESSAGE_LIMIT: usize = 2000;

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageHandle, AppError>;
    async fn edit(&self, channel_id: &str, handle: &MessageHandle, text: &str) -> Result<(), AppError>;
    async fn fetch_recent(&self, channel_id: &str, limit: u32) -> Result<Vec<RecentMessage>, AppError>;
}

pub struct DiscordSink {
    http: reqwest::Client,
    bot_token: String,
    bot_user_id: std::sync::OnceLock<String>,
}

#[derive(Deserialize)]
struct DiscordMessage {
    id: String,
    #[serde(default)]
    author: Option<DiscordAuthor>,
    #[serde(default)]
    content: String,
    timestamp: String,
}

#[derive(Deserialize)]
struct DiscordAuthor {
    id: String,
}

impl DiscordSink {
    const BASE_URL: &'static str = "https://discord.com/api/v10";

    pub fn new(bot_token: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            bot_token,
            bot_user_id: std::sync::OnceLock::new(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }
}

#[async_trait]
impl MessageSink for DiscordSink {
    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageHandle, AppError> {
        let url = format!("{}/channels/{channel_id}/messages", Self::BASE_URL);
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::Sink(format!("discord send failed HTTP {status}: {body}")));
        }
        let msg: DiscordMessage = serde_json::from_str(&body)?;
        Ok(MessageHandle(msg.id))
    }

    async fn edit(&self, channel_id: &str, handle: &MessageHandle, text: &str) -> Result<(), AppError> {
        let url = format!("{}/channels/{channel_id}/messages/{}", Self::BASE_URL, handle.0);
        let resp = self
            .http
            .patch(url)
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Sink(format!("discord edit failed HTTP {status}: {body}")));
        }
        Ok(())
    }

    async fn fetch_recent(&self, channel_id: &str, limit: u32) -> Result<Vec<RecentMessage>, AppError> {
        let url = format!("{}/channels/{channel_id}/messages?limit={limit}", Self::BASE_URL);
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::Sink(format!("discord fetch_recent failed HTTP {status}: {body}")));
        }
        let messages: Vec<DiscordMessage> = serde_json::from_str(&body)?;
        Ok(messages
            .into_iter()
            .map(|m| RecentMessage {
                handle: MessageHandle(m.id),
                author_id: m.author.map(|a| a.id).unwrap_or_default(),
                created_at_ms: chrono::DateTime::parse_from_rfc3339(&m.timestamp)
                    .map(|dt| dt.timestamp_millis())
                    .unwrap_or(0),
                text: m.content,
            })
            .collect())
    }
}

/// In-memory double for tests: keeps sent/edited text per channel, in order.
pub struct InMemorySink {
    messages: tokio::sync::Mutex<std::collections::HashMap<String, Vec<(MessageHandle, String)>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            messages: tokio::sync::Mutex::new(std::collections::HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    pub async fn message_text(&self, channel_id: &str, handle: &MessageHandle) -> Option<String> {
        let guard = self.messages.lock().await;
        guard
            .get(channel_id)?
            .iter()
            .find(|(h, _)| h == handle)
            .map(|(_, t)| t.clone())
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSink for InMemorySink {
    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageHandle, AppError> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let handle = MessageHandle(id.to_string());
        let mut guard = self.messages.lock().await;
        guard
            .entry(channel_id.to_string())
            .or_default()
            .push((handle.clone(), text.to_string()));
        Ok(handle)
    }

    async fn edit(&self, channel_id: &str, handle: &MessageHandle, text: &str) -> Result<(), AppError> {
        let mut guard = self.messages.lock().await;
        let Some(entries) = guard.get_mut(channel_id) else {
            return Err(AppError::Sink("unknown channel".to_string()));
        };
        let Some(entry) = entries.iter_mut().find(|(h, _)| h == handle) else {
            return Err(AppError::Sink("unknown message handle".to_string()));
        };
        entry.1 = text.to_string();
        Ok(())
    }

    async fn fetch_recent(&self, channel_id: &str, limit: u32) -> Result<Vec<RecentMessage>, AppError> {
        let guard = self.messages.lock().await;
        let Some(entries) = guard.get(channel_id) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .rev()
            .take(limit as usize)
            .map(|(h, t)| RecentMessage {
                handle: h.clone(),
                author_id: "bot".to_string(),
                created_at_ms: 0,
                text: t.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_edit_round_trips_through_in_memory_sink() {
        let sink = InMemorySink::new();
        let handle = sink.send("chan", "hello").await.unwrap();
        assert_eq!(sink.message_text("chan", &handle).await.as_deref(), Some("hello"));

        sink.edit("chan", &handle, "updated").await.unwrap();
        assert_eq!(sink.message_text("chan", &handle).await.as_deref(), Some("updated"));
    }

    #[tokio::test]
    async fn edit_unknown_handle_errors() {
        let sink = InMemorySink::new();
        sink.send("chan", "hello").await.unwrap();
        let err = sink.edit("chan", &MessageHandle("missing".into()), "x").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn fetch_recent_respects_limit() {
        let sink = InMemorySink::new();
        for i in 0..5 {
            sink.send("chan", &format!("msg{i}")).await.unwrap();
        }
        let recent = sink.fetch_recent("chan", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
    }
}
