//! Thin Slack Web API client. Only the handful of methods the backend needs.
//!
//! Every method is a form-encoded POST to `<base_url>/<method>` with the bot
//! token as a bearer. Slack answers `200` with `{"ok": false, "error": "..."}`
//! for API-level failures, so the `ok` flag is checked on every response.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use ticket_core::TicketError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const CHANNEL_PAGE_SIZE: u32 = 500;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Slack returned `ok: false` with this error code.
    #[error("slack api {method}: {code}")]
    Slack { method: String, code: String },

    #[error("slack transport {method}: {message}")]
    Transport { method: String, message: String },
}

impl ApiError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Slack { code, .. } => Some(code),
            ApiError::Transport { .. } => None,
        }
    }
}

impl From<ApiError> for TicketError {
    fn from(e: ApiError) -> Self {
        TicketError::Backend(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthInfo {
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Deserialize)]
struct ChannelPage {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Deserialize)]
struct ChannelReply {
    channel: Channel,
}

#[derive(Deserialize)]
struct MessageReply {
    ts: String,
}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl SlackClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, TicketError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TicketError::Config(format!("slack http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let transport = |message: String| ApiError::Transport {
            method: method.to_string(),
            message,
        };
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
            .form(params)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("http {status}")));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transport(format!("invalid json: {e}")))?;

        if body.get("ok").and_then(serde_json::Value::as_bool) != Some(true) {
            let code = body
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown_error")
                .to_string();
            return Err(ApiError::Slack {
                method: method.to_string(),
                code,
            });
        }
        serde_json::from_value(body).map_err(|e| transport(format!("unexpected reply: {e}")))
    }

    pub async fn auth_test(&self) -> Result<AuthInfo, ApiError> {
        self.call("auth.test", &[]).await
    }

    /// One page of non-archived channels; the second value is the next cursor.
    pub async fn list_channels(
        &self,
        cursor: Option<&str>,
    ) -> Result<(Vec<Channel>, Option<String>), ApiError> {
        let mut params = vec![
            ("exclude_archived", "true".to_string()),
            ("limit", CHANNEL_PAGE_SIZE.to_string()),
        ];
        if let Some(c) = cursor {
            params.push(("cursor", c.to_string()));
        }
        let page: ChannelPage = self.call("conversations.list", &params).await?;
        let next = page
            .response_metadata
            .map(|m| m.next_cursor)
            .filter(|c| !c.is_empty());
        Ok((page.channels, next))
    }

    pub async fn create_channel(&self, name: &str) -> Result<Channel, ApiError> {
        let reply: ChannelReply = self
            .call("conversations.create", &[("name", name.to_string())])
            .await?;
        Ok(reply.channel)
    }

    pub async fn invite(&self, channel_id: &str, users: &[String]) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .call(
                "conversations.invite",
                &[
                    ("channel", channel_id.to_string()),
                    ("users", users.join(",")),
                ],
            )
            .await?;
        Ok(())
    }

    /// Post `text`, optionally as a reply in `thread_ts`. Returns the message ts.
    pub async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("text", text.to_string()),
        ];
        if let Some(ts) = thread_ts {
            params.push(("thread_ts", ts.to_string()));
        }
        let reply: MessageReply = self.call("chat.postMessage", &params).await?;
        Ok(reply.ts)
    }
}
