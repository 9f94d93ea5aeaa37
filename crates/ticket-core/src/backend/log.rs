//! `log` backend: tickets live only in the system of record and every
//! notification is a tracing event. The default for local runs.
//!
//! Webhook body (JSON):
//!
//! ```text
//! {"action": "close",  "issue_key": "LOG-..."}
//! {"action": "snooze", "issue_key": "LOG-...", "days": 14}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{
    append_closed_version, append_snoozed_version, load_ticket, TicketBackend, WebhookReply,
    WebhookRequest,
};
use crate::error::Result;
use crate::store::TicketStore;
use crate::types::{RecommendationRow, Ticket};

pub const ISSUE_KEY_PREFIX: &str = "LOG-";

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum LogWebhook {
    Close {
        issue_key: String,
    },
    Snooze {
        issue_key: String,
        #[serde(default)]
        days: i64,
    },
}

pub struct LogBackend {
    store: Arc<dyn TicketStore>,
    initialized: AtomicBool,
}

impl LogBackend {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self {
            store,
            initialized: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TicketBackend for LogBackend {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn init(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            tracing::info!("log ticket backend ready");
        }
        Ok(())
    }

    async fn create_ticket(&self, ticket: &mut Ticket, row: &RecommendationRow) -> Result<String> {
        let issue_key = format!("{ISSUE_KEY_PREFIX}{}", Uuid::new_v4());
        ticket.issue_key = issue_key.clone();
        if ticket.subject.is_empty() {
            ticket.subject = if row.recommender_subtype.is_empty() {
                ticket.target_resource.clone()
            } else {
                format!("{} {}", row.recommender_subtype, ticket.target_resource)
            };
        }
        tracing::info!(
            issue_key = %issue_key,
            contact = %ticket.target_contact,
            assignees = ?ticket.assignee,
            "created ticket"
        );
        self.update_ticket(ticket, row).await?;
        Ok(issue_key)
    }

    async fn update_ticket(&self, ticket: &mut Ticket, row: &RecommendationRow) -> Result<()> {
        ticket.last_ping_date = Utc::now();
        tracing::info!(
            issue_key = %ticket.issue_key,
            target_resource = %ticket.target_resource,
            project_id = %row.project_id,
            cost = ?row.impact_cost_unit,
            description = %row.description,
            "ticket notification"
        );
        Ok(())
    }

    async fn close_ticket(&self, issue_key: &str) -> Result<()> {
        append_closed_version(self.store.as_ref(), issue_key, Utc::now()).await?;
        tracing::info!(issue_key, "closed ticket");
        Ok(())
    }

    async fn get_ticket(&self, issue_key: &str) -> Result<Ticket> {
        load_ticket(self.store.as_ref(), issue_key).await
    }

    async fn handle_webhook_action(&self, request: WebhookRequest) -> Result<WebhookReply> {
        let action: LogWebhook = serde_json::from_slice(&request.body)?;
        match action {
            LogWebhook::Close { issue_key } => self.close_ticket(&issue_key).await?,
            LogWebhook::Snooze { issue_key, days } => {
                let t =
                    append_snoozed_version(self.store.as_ref(), &issue_key, days, Utc::now())
                        .await?;
                tracing::info!(issue_key = %t.issue_key, until = %t.snooze_date, "snoozed ticket");
            }
        }
        Ok(WebhookReply::Ack)
    }
}
