//! System-of-record access.
//!
//! The engine talks to storage through three narrow traits so the Postgres
//! store and the in-memory store are interchangeable:
//!
//! - [`RecommendationSource`]: the reconciliation query (recommendations
//!   LEFT JOIN latest ticket per target resource)
//! - [`RoutingStore`]: the two routing lookups the resolver falls back across
//! - [`TicketStore`]: the atomic batch append plus point lookups
//!
//! The ticket table is append-only. The current state of a ticket is the most
//! recently appended row for its issue key.

pub mod memory;
pub mod postgres;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ReconcileConfig;
use crate::error::Result;
use crate::types::{RecommendationRow, RoutingRow, Ticket};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Parameters of the reconciliation query.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileQuery {
    pub cost_threshold: i64,
    pub allow_null_cost: bool,
    pub exclude_subtypes: Vec<String>,
    pub limit: i64,
    /// Existing tickets whose snooze is still after `now` are left alone.
    pub now: DateTime<Utc>,
}

impl ReconcileQuery {
    pub fn from_config(cfg: &ReconcileConfig, now: DateTime<Utc>) -> Self {
        Self {
            cost_threshold: cfg.cost_threshold,
            allow_null_cost: cfg.allow_null_cost,
            exclude_subtypes: cfg.exclude_subtypes.clone(),
            limit: cfg.limit,
            now,
        }
    }

    /// Cost and subtype filters shared by every store implementation.
    pub fn admits(&self, record: &RecommendationRecord) -> bool {
        let cost_ok = match record.impact_cost_unit {
            Some(cost) => cost >= self.cost_threshold,
            None => self.allow_null_cost,
        };
        cost_ok && !self.exclude_subtypes.contains(&record.recommender_subtype)
    }
}

/// A recommendation as exported, before it is flattened to one row per
/// target resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationRecord {
    pub project_name: String,
    pub project_id: String,
    pub recommender_name: String,
    pub recommender_subtype: String,
    pub location: String,
    pub impact_cost_unit: Option<i64>,
    pub impact_currency_code: Option<String>,
    pub description: String,
    pub target_resources: Vec<String>,
    pub labels: String,
}

impl RecommendationRecord {
    /// One row per target resource, each joined with `ticket_for(resource)`.
    pub fn flatten<F>(&self, mut ticket_for: F) -> Vec<RecommendationRow>
    where
        F: FnMut(&str) -> Option<Ticket>,
    {
        self.target_resources
            .iter()
            .map(|resource| RecommendationRow {
                project_name: self.project_name.clone(),
                project_id: self.project_id.clone(),
                recommender_name: self.recommender_name.clone(),
                recommender_subtype: self.recommender_subtype.clone(),
                location: self.location.clone(),
                impact_cost_unit: self.impact_cost_unit,
                impact_currency_code: self.impact_currency_code.clone(),
                description: self.description.clone(),
                target_resource: resource.clone(),
                labels: self.labels.clone(),
                ticket: ticket_for(resource).unwrap_or_default(),
            })
            .collect()
    }
}

#[async_trait]
pub trait RecommendationSource: Send + Sync {
    /// Rows that need a ticket created or refreshed, at most `query.limit`.
    async fn query_for_reconciliation(
        &self,
        query: &ReconcileQuery,
    ) -> Result<Vec<RecommendationRow>>;
}

#[async_trait]
pub trait RoutingStore: Send + Sync {
    /// At most one row for `project_id` whose labels intersect `labels`.
    async fn routing_by_labels(
        &self,
        project_id: &str,
        labels: &[String],
    ) -> Result<Vec<RoutingRow>>;

    /// At most one row for `project_id`, labels ignored.
    async fn routing_by_project(&self, project_id: &str) -> Result<Vec<RoutingRow>>;
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Append every ticket in one atomic commit. Returns the rows written.
    ///
    /// Either all of `tickets` become visible or none do.
    async fn append_tickets(&self, tickets: &[Ticket]) -> Result<usize>;

    /// Most recently appended version of the ticket, if any.
    async fn latest_ticket(&self, issue_key: &str) -> Result<Option<Ticket>>;
}

/// Everything a reconciliation pass needs from the system of record.
pub trait Store: RecommendationSource + RoutingStore + TicketStore {}

impl<T> Store for T where T: RecommendationSource + RoutingStore + TicketStore {}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cost: Option<i64>, subtype: &str) -> RecommendationRecord {
        RecommendationRecord {
            recommender_subtype: subtype.into(),
            impact_cost_unit: cost,
            target_resources: vec!["a".into(), "b".into()],
            ..Default::default()
        }
    }

    fn query(allow_null_cost: bool) -> ReconcileQuery {
        ReconcileQuery {
            cost_threshold: 100,
            allow_null_cost,
            exclude_subtypes: vec!["SNAPSHOT_AND_DELETE_DISK".into()],
            limit: 10,
            now: Utc::now(),
        }
    }

    #[test]
    fn cost_threshold_is_inclusive() {
        assert!(query(false).admits(&record(Some(100), "CHANGE_MACHINE_TYPE")));
        assert!(!query(false).admits(&record(Some(99), "CHANGE_MACHINE_TYPE")));
    }

    #[test]
    fn null_cost_needs_allowance() {
        assert!(!query(false).admits(&record(None, "CHANGE_MACHINE_TYPE")));
        assert!(query(true).admits(&record(None, "CHANGE_MACHINE_TYPE")));
    }

    #[test]
    fn excluded_subtype_is_filtered() {
        assert!(!query(true).admits(&record(Some(500), "SNAPSHOT_AND_DELETE_DISK")));
    }

    #[test]
    fn flatten_emits_one_row_per_resource() {
        let rows = record(Some(1), "X").flatten(|r| {
            (r == "b").then(|| Ticket {
                issue_key: "T-1".into(),
                ..Default::default()
            })
        });
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].ticket.exists());
        assert_eq!(rows[1].ticket.issue_key, "T-1");
        assert_eq!(rows[1].target_resource, "b");
    }
}
