//! The ticket backend contract.
//!
//! A backend owns the ticket/notification lifecycle on the far side (a chat
//! channel, an issue tracker, a log line). Exactly one backend is active per
//! process; the server picks it by name at startup and calls [`TicketBackend::init`]
//! before accepting requests.
//!
//! Implementations must be safe to call concurrently from many reconciliation
//! tasks. Any internal caches are the backend's own business.

pub mod log;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, TicketError};
use crate::store::TicketStore;
use crate::types::{snooze_until, RecommendationRow, Ticket, TicketStatus};

pub use self::log::LogBackend;

// ---------------------------------------------------------------------------
// Webhook envelope
// ---------------------------------------------------------------------------

/// An inbound webhook, forwarded verbatim from the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Header names are stored lower-cased.
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new<I, K, V>(headers: I, body: Vec<u8>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
            body,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// What the HTTP layer should send back to the webhook caller.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookReply {
    /// Plain `200 OK`, no body.
    Ack,
    /// `200 OK` with a JSON body (e.g. a verification challenge).
    Json(serde_json::Value),
}

// ---------------------------------------------------------------------------
// TicketBackend
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TicketBackend: Send + Sync {
    /// Registry name, e.g. `"slack"`.
    fn name(&self) -> &'static str;

    /// One-time setup. Calling it again is a no-op.
    async fn init(&self) -> Result<()>;

    /// Create the ticket on the backend and return its issue key.
    ///
    /// May fill `subject` and dates on `ticket`. Retrying with the same
    /// inputs must not produce a second ticket; dedup is the backend's job.
    async fn create_ticket(&self, ticket: &mut Ticket, row: &RecommendationRow) -> Result<String>;

    /// Re-notify an existing ticket with the recommendation details.
    async fn update_ticket(&self, ticket: &mut Ticket, row: &RecommendationRow) -> Result<()>;

    async fn close_ticket(&self, issue_key: &str) -> Result<()>;

    async fn get_ticket(&self, issue_key: &str) -> Result<Ticket>;

    async fn handle_webhook_action(&self, request: WebhookRequest) -> Result<WebhookReply>;
}

// ---------------------------------------------------------------------------
// Store helpers shared by backends
// ---------------------------------------------------------------------------

/// Current version of a ticket, or `TicketNotFound`.
pub async fn load_ticket(store: &dyn TicketStore, issue_key: &str) -> Result<Ticket> {
    store
        .latest_ticket(issue_key)
        .await?
        .ok_or_else(|| TicketError::TicketNotFound(issue_key.to_string()))
}

/// Append a `Closed` version of the ticket.
pub async fn append_closed_version(
    store: &dyn TicketStore,
    issue_key: &str,
    now: DateTime<Utc>,
) -> Result<Ticket> {
    let mut ticket = load_ticket(store, issue_key).await?;
    ticket.status = Some(TicketStatus::Closed);
    ticket.last_update_date = now;
    if ticket.snooze_date < now {
        ticket.snooze_date = now;
    }
    store.append_tickets(std::slice::from_ref(&ticket)).await?;
    Ok(ticket)
}

/// Longest snooze a webhook or chat command may ask for.
pub const MAX_SNOOZE_DAYS: i64 = 365;

/// `now + days`, or the default snooze when `days` is zero or negative.
pub fn snoozed_until(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    if days <= 0 {
        return Ok(snooze_until(now));
    }
    if days > MAX_SNOOZE_DAYS {
        return Err(TicketError::InvalidSnooze(days));
    }
    chrono::TimeDelta::try_days(days)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or(TicketError::InvalidSnooze(days))
}

/// Append a version of the ticket snoozed for `days` from `now`.
pub async fn append_snoozed_version(
    store: &dyn TicketStore,
    issue_key: &str,
    days: i64,
    now: DateTime<Utc>,
) -> Result<Ticket> {
    let mut ticket = load_ticket(store, issue_key).await?;
    ticket.snooze_date = snoozed_until(now, days)?;
    ticket.last_update_date = now;
    store.append_tickets(std::slice::from_ref(&ticket)).await?;
    Ok(ticket)
}
