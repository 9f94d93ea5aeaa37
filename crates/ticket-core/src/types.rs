use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Every reconciliation pass pushes an existing ticket's snooze this far out.
pub const SNOOZE_DAYS: i64 = 7;

/// `now + SNOOZE_DAYS`.
pub fn snooze_until(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::days(SNOOZE_DAYS)
}

// ---------------------------------------------------------------------------
// TicketStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    New,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "New",
            TicketStatus::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = crate::TicketError;
    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "New" => Ok(TicketStatus::New),
            "Closed" => Ok(TicketStatus::Closed),
            other => Err(crate::TicketError::Schema(format!(
                "unknown ticket status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// A ticket as stored in the system of record.
///
/// `Ticket::default()` is the "no ticket yet" sentinel: empty issue key,
/// no status and every date at the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ticket {
    pub issue_key: String,
    pub target_contact: String,
    pub creation_date: DateTime<Utc>,
    pub status: Option<TicketStatus>,
    pub target_resource: String,
    pub recommender_id: String,
    pub last_update_date: DateTime<Utc>,
    pub last_ping_date: DateTime<Utc>,
    pub snooze_date: DateTime<Utc>,
    pub subject: String,
    pub assignee: Vec<String>,
}

impl Ticket {
    /// A ticket exists once the backend has handed out an issue key.
    pub fn exists(&self) -> bool {
        !self.issue_key.is_empty()
    }

    /// Bookkeeping refresh applied to an existing ticket on every pass.
    pub fn refresh(&mut self, recommender_id: &str, now: DateTime<Utc>) {
        self.recommender_id = recommender_id.to_string();
        self.snooze_date = snooze_until(now);
    }

    /// Build the pre-creation ticket for an unticketed recommendation.
    pub fn for_new_recommendation(
        row: &RecommendationRow,
        routing: &RoutingRow,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            issue_key: String::new(),
            target_contact: routing.target.clone(),
            creation_date: now,
            status: Some(TicketStatus::New),
            target_resource: row.target_resource.clone(),
            recommender_id: row.recommender_name.clone(),
            last_update_date: now,
            last_ping_date: now,
            snooze_date: snooze_until(now),
            subject: String::new(),
            assignee: routing.ticket_system_identifiers.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RecommendationRow
// ---------------------------------------------------------------------------

/// One actionable recommendation for a single target resource, joined with
/// the latest ticket for that resource (or the sentinel).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationRow {
    pub project_name: String,
    pub project_id: String,
    pub recommender_name: String,
    pub recommender_subtype: String,
    pub location: String,
    pub impact_cost_unit: Option<i64>,
    pub impact_currency_code: Option<String>,
    pub description: String,
    pub target_resource: String,
    /// JSON-encoded list of declared device names or labels, as stored.
    pub labels: String,
    pub ticket: Ticket,
}

// ---------------------------------------------------------------------------
// RoutingRow
// ---------------------------------------------------------------------------

/// Ownership mapping from a project (and optionally device labels) to a
/// contact and the assignees to invite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingRow {
    pub target: String,
    pub project_id: String,
    pub device_names_or_labels: Vec<String>,
    pub ticket_system_identifiers: Vec<String>,
}
