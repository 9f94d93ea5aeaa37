//! The `slack` ticket backend.
//!
//! Two layouts, picked by `channel_as_ticket`:
//!
//! - channel-as-ticket: one channel per recommendation, named after the
//!   subject; the issue key is the channel id
//! - thread-as-ticket: one channel per routing contact, one thread per
//!   recommendation; the issue key is `<channel id>-<thread ts>`
//!
//! Channels are created on demand and cached by name. The cache lock is held
//! across create-or-reuse so concurrent reconcile tasks never race to create
//! the same channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;

use ticket_core::backend::{
    append_closed_version, append_snoozed_version, load_ticket, TicketBackend, WebhookReply,
    WebhookRequest,
};
use ticket_core::config::SlackConfig;
use ticket_core::store::TicketStore;
use ticket_core::types::{RecommendationRow, Ticket};
use ticket_core::{Result, TicketError};

use crate::api::{ApiError, Channel, SlackClient};
use crate::naming;
use crate::signature;

// ---------------------------------------------------------------------------
// Webhook payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event: Event,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(default)]
    text: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
}

/// A chat command addressed to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Close,
    /// Snooze for this many days; zero means the default snooze.
    Snooze(i64),
}

/// Parse `close` or `snooze [days]`, ignoring `<@U…>` mentions and case.
pub fn parse_command(text: &str) -> Option<Command> {
    let mut words = text
        .split_whitespace()
        .filter(|w| !(w.starts_with("<@") && w.ends_with('>')))
        .map(str::to_ascii_lowercase);
    match words.next()?.as_str() {
        "close" => Some(Command::Close),
        "snooze" => {
            let days = words.next().and_then(|d| d.parse().ok()).unwrap_or(0);
            Some(Command::Snooze(days))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// SlackBackend
// ---------------------------------------------------------------------------

pub struct SlackBackend {
    client: SlackClient,
    signing_secret: Option<String>,
    channel_as_ticket: bool,
    store: Arc<dyn TicketStore>,
    channels: Mutex<HashMap<String, Channel>>,
    initialized: AtomicBool,
}

impl SlackBackend {
    pub fn new(config: &SlackConfig, store: Arc<dyn TicketStore>) -> Result<Self> {
        let token = config
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TicketError::Config("slack backend needs an API token".into()))?;
        if config.signing_secret.is_none() {
            tracing::warn!("no slack signing secret set; webhooks will be rejected");
        }
        Ok(Self {
            client: SlackClient::new(&config.api_url, token)?,
            signing_secret: config.signing_secret.clone(),
            channel_as_ticket: config.channel_as_ticket,
            store,
            channels: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        })
    }

    async fn refresh_channels(&self, cache: &mut HashMap<String, Channel>) -> Result<()> {
        cache.clear();
        let mut cursor: Option<String> = None;
        loop {
            let (page, next) = self.client.list_channels(cursor.as_deref()).await?;
            for channel in page {
                cache.insert(channel.name.clone(), channel);
            }
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        tracing::debug!(channels = cache.len(), "refreshed slack channel cache");
        Ok(())
    }

    /// Cached channel by name, created if missing.
    async fn ensure_channel(&self, name: &str) -> Result<Channel> {
        let mut cache = self.channels.lock().await;
        if let Some(channel) = cache.get(name) {
            return Ok(channel.clone());
        }
        let channel = match self.client.create_channel(name).await {
            Ok(channel) => channel,
            Err(e) if e.code() == Some("name_taken") => {
                tracing::debug!(channel = name, "channel exists; refreshing cache");
                self.refresh_channels(&mut cache).await?;
                return cache.get(name).cloned().ok_or_else(|| {
                    TicketError::Backend(format!(
                        "channel '{name}' is taken but not visible to the bot"
                    ))
                });
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(channel = %channel.name, id = %channel.id, "created slack channel");
        cache.insert(channel.name.clone(), channel.clone());
        Ok(channel)
    }

    async fn invite(&self, channel_id: &str, users: &[String]) -> Result<()> {
        if users.is_empty() {
            return Ok(());
        }
        match self.client.invite(channel_id, users).await {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("already_in_channel") => {
                tracing::debug!(channel = channel_id, "assignees already in channel");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn post(&self, issue_key: &str, text: &str) -> std::result::Result<String, ApiError> {
        let (channel, thread_ts) = self.locate(issue_key);
        self.client.post_message(channel, text, thread_ts).await
    }

    fn locate<'a>(&self, issue_key: &'a str) -> (&'a str, Option<&'a str>) {
        if self.channel_as_ticket {
            (issue_key, None)
        } else {
            naming::split_issue_key(issue_key)
        }
    }

    fn issue_key_for_event(&self, event: &Event) -> String {
        if self.channel_as_ticket {
            event.channel.clone()
        } else {
            let ts = event.thread_ts.as_deref().unwrap_or(&event.ts);
            naming::thread_issue_key(&event.channel, ts)
        }
    }

    async fn create_channel_ticket(
        &self,
        ticket: &mut Ticket,
        row: &RecommendationRow,
    ) -> Result<String> {
        ticket.subject = naming::channel_ticket_subject(&row.recommender_subtype, &row.target_resource);
        let name = naming::channel_name_from_subject(&ticket.subject);
        let channel = self.ensure_channel(&name).await?;
        ticket.issue_key = channel.id.clone();
        self.invite(&channel.id, &ticket.assignee).await?;
        Ok(channel.id)
    }

    async fn create_thread_ticket(
        &self,
        ticket: &mut Ticket,
        row: &RecommendationRow,
    ) -> Result<String> {
        ticket.subject = naming::thread_ticket_subject(
            &row.project_name,
            &row.target_resource,
            &row.recommender_subtype,
        );
        let name = naming::channel_name_from_contact(&ticket.target_contact);
        let channel = self.ensure_channel(&name).await?;
        self.invite(&channel.id, &ticket.assignee).await?;
        let ts = self
            .client
            .post_message(&channel.id, &ticket.subject, None)
            .await?;
        let issue_key = naming::thread_issue_key(&channel.id, &ts);
        ticket.issue_key = issue_key.clone();
        Ok(issue_key)
    }

    async fn handle_event(&self, event: Event) -> Result<()> {
        if event.bot_id.is_some() || event.channel.is_empty() {
            return Ok(());
        }
        let Some(command) = parse_command(&event.text) else {
            return Ok(());
        };
        let issue_key = self.issue_key_for_event(&event);
        let result = match command {
            Command::Close => self.close_ticket(&issue_key).await,
            Command::Snooze(days) => self.snooze(&issue_key, days).await,
        };
        match result {
            Ok(()) => {
                tracing::info!(%issue_key, ?command, "applied slack command");
                Ok(())
            }
            Err(TicketError::TicketNotFound(_)) => {
                tracing::warn!(%issue_key, ?command, "slack command for unknown ticket; ignoring");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn snooze(&self, issue_key: &str, days: i64) -> Result<()> {
        let reply = match append_snoozed_version(self.store.as_ref(), issue_key, days, Utc::now())
            .await
        {
            Ok(ticket) => format!("Snoozed until {}.", ticket.snooze_date.format("%Y-%m-%d")),
            Err(e @ TicketError::InvalidSnooze(_)) => {
                tracing::warn!(%issue_key, days, "rejected slack snooze");
                format!("Cannot snooze: {e}.")
            }
            Err(e) => return Err(e),
        };
        self.post(issue_key, &reply).await?;
        Ok(())
    }
}

fn details_message(ticket: &Ticket, row: &RecommendationRow) -> String {
    let mut lines = vec![format!("*{}*", ticket.subject)];
    lines.push(format!("Resource: {}", ticket.target_resource));
    if !row.project_id.is_empty() {
        lines.push(format!("Project: {} ({})", row.project_name, row.project_id));
    }
    if !row.location.is_empty() {
        lines.push(format!("Location: {}", row.location));
    }
    if let Some(cost) = row.impact_cost_unit {
        let currency = row.impact_currency_code.as_deref().unwrap_or("");
        lines.push(format!("Estimated monthly impact: {cost} {currency}").trim_end().to_string());
    }
    if !row.description.is_empty() {
        lines.push(row.description.clone());
    }
    lines.push("Reply `close` when done or `snooze <days>` to defer.".to_string());
    lines.join("\n")
}

#[async_trait]
impl TicketBackend for SlackBackend {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let auth = self.client.auth_test().await?;
        tracing::info!(team = %auth.team, user = %auth.user, "authenticated with slack");
        tracing::info!(channel_as_ticket = self.channel_as_ticket, "slack ticket layout");

        let mut cache = self.channels.lock().await;
        if let Err(e) = self.refresh_channels(&mut cache).await {
            tracing::warn!(error = %e, "could not build slack channel cache");
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_ticket(&self, ticket: &mut Ticket, row: &RecommendationRow) -> Result<String> {
        let issue_key = if self.channel_as_ticket {
            self.create_channel_ticket(ticket, row).await?
        } else {
            self.create_thread_ticket(ticket, row).await?
        };
        if let Err(e) = self.update_ticket(ticket, row).await {
            tracing::warn!(%issue_key, error = %e, "ticket created but first notification failed");
        }
        Ok(issue_key)
    }

    async fn update_ticket(&self, ticket: &mut Ticket, row: &RecommendationRow) -> Result<()> {
        self.post(&ticket.issue_key, &details_message(ticket, row))
            .await?;
        ticket.last_ping_date = Utc::now();
        Ok(())
    }

    async fn close_ticket(&self, issue_key: &str) -> Result<()> {
        let closed = append_closed_version(self.store.as_ref(), issue_key, Utc::now()).await?;
        if let Err(e) = self.post(issue_key, "Ticket closed.").await {
            tracing::warn!(issue_key, error = %e, "closed ticket but could not post to slack");
        }
        tracing::info!(issue_key, target_resource = %closed.target_resource, "closed ticket");
        Ok(())
    }

    async fn get_ticket(&self, issue_key: &str) -> Result<Ticket> {
        load_ticket(self.store.as_ref(), issue_key).await
    }

    async fn handle_webhook_action(&self, request: WebhookRequest) -> Result<WebhookReply> {
        let secret = self
            .signing_secret
            .as_deref()
            .ok_or_else(|| TicketError::Signature("no signing secret configured".into()))?;
        signature::verify(secret, &request, Utc::now().timestamp())?;

        let envelope: Envelope = serde_json::from_slice(&request.body)?;
        match envelope {
            Envelope::UrlVerification { challenge } => {
                Ok(WebhookReply::Json(serde_json::json!({ "challenge": challenge })))
            }
            Envelope::EventCallback { event } => {
                self.handle_event(event).await?;
                Ok(WebhookReply::Ack)
            }
            Envelope::Other => Ok(WebhookReply::Ack),
        }
    }
}
