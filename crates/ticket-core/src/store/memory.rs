//! In-process system of record.
//!
//! Backs the test suites and `--database-url`-less dry runs. Semantics match
//! the Postgres store: append-only tickets, latest row wins, all-or-nothing
//! batch commits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{RecommendationRecord, RecommendationSource, ReconcileQuery, RoutingStore, TicketStore};
use crate::error::{Result, TicketError};
use crate::types::{RecommendationRow, RoutingRow, Ticket};

#[derive(Default)]
struct Tables {
    recommendations: Vec<RecommendationRecord>,
    routing: Vec<RoutingRow>,
    tickets: Vec<Ticket>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_commits: AtomicBool,
    append_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means a test panicked mid-write; the data is
        // still usable for the assertions that follow.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_recommendation(&self, record: RecommendationRecord) {
        self.tables().recommendations.push(record);
    }

    pub fn insert_routing(&self, row: RoutingRow) {
        self.tables().routing.push(row);
    }

    /// Every appended ticket row, oldest first.
    pub fn ticket_rows(&self) -> Vec<Ticket> {
        self.tables().tickets.clone()
    }

    /// Make every subsequent `append_tickets` fail without writing anything.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of `append_tickets` calls so far, failed ones included.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn latest_for_resource(tickets: &[Ticket], resource: &str) -> Option<Ticket> {
        tickets
            .iter()
            .rev()
            .find(|t| t.target_resource == resource)
            .cloned()
    }
}

#[async_trait]
impl RecommendationSource for MemoryStore {
    async fn query_for_reconciliation(
        &self,
        query: &ReconcileQuery,
    ) -> Result<Vec<RecommendationRow>> {
        let tables = self.tables();
        let limit = usize::try_from(query.limit.max(0))
            .map_err(|e| TicketError::Query(e.to_string()))?;

        let rows = tables
            .recommendations
            .iter()
            .filter(|r| query.admits(r))
            .flat_map(|r| r.flatten(|res| Self::latest_for_resource(&tables.tickets, res)))
            .filter(|row| !row.ticket.exists() || query.now >= row.ticket.snooze_date)
            .take(limit)
            .collect();
        Ok(rows)
    }
}

#[async_trait]
impl RoutingStore for MemoryStore {
    async fn routing_by_labels(
        &self,
        project_id: &str,
        labels: &[String],
    ) -> Result<Vec<RoutingRow>> {
        Ok(self
            .tables()
            .routing
            .iter()
            .find(|r| {
                r.project_id == project_id
                    && r.device_names_or_labels.iter().any(|l| labels.contains(l))
            })
            .cloned()
            .into_iter()
            .collect())
    }

    async fn routing_by_project(&self, project_id: &str) -> Result<Vec<RoutingRow>> {
        Ok(self
            .tables()
            .routing
            .iter()
            .find(|r| r.project_id == project_id)
            .cloned()
            .into_iter()
            .collect())
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn append_tickets(&self, tickets: &[Ticket]) -> Result<usize> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(TicketError::Commit("injected commit failure".into()));
        }
        if let Some(t) = tickets.iter().find(|t| !t.exists()) {
            return Err(TicketError::Commit(format!(
                "ticket for '{}' has no issue key",
                t.target_resource
            )));
        }
        self.tables().tickets.extend_from_slice(tickets);
        Ok(tickets.len())
    }

    async fn latest_ticket(&self, issue_key: &str) -> Result<Option<Ticket>> {
        Ok(self
            .tables()
            .tickets
            .iter()
            .rev()
            .find(|t| t.issue_key == issue_key)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn rec(resources: &[&str], cost: i64) -> RecommendationRecord {
        RecommendationRecord {
            project_id: "proj".into(),
            recommender_name: "rec-1".into(),
            recommender_subtype: "CHANGE_MACHINE_TYPE".into(),
            impact_cost_unit: Some(cost),
            target_resources: resources.iter().map(|s| s.to_string()).collect(),
            labels: "[]".into(),
            ..Default::default()
        }
    }

    fn query(limit: i64) -> ReconcileQuery {
        ReconcileQuery {
            cost_threshold: 100,
            allow_null_cost: false,
            exclude_subtypes: vec![],
            limit,
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unticketed_rows_are_returned_with_sentinel() {
        let store = MemoryStore::new();
        store.insert_recommendation(rec(&["vm-1", "vm-2"], 150));
        let rows = store.query_for_reconciliation(&query(10)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| !r.ticket.exists()));
    }

    #[tokio::test]
    async fn snoozed_ticket_hides_row_until_elapsed() {
        let store = MemoryStore::new();
        store.insert_recommendation(rec(&["vm-1"], 150));
        let q = query(10);
        store
            .append_tickets(&[Ticket {
                issue_key: "T-1".into(),
                target_resource: "vm-1".into(),
                snooze_date: q.now + Duration::days(1),
                ..Default::default()
            }])
            .await
            .unwrap();
        assert!(store.query_for_reconciliation(&q).await.unwrap().is_empty());

        let later = ReconcileQuery {
            now: q.now + Duration::days(2),
            ..q
        };
        let rows = store.query_for_reconciliation(&later).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticket.issue_key, "T-1");
    }

    #[tokio::test]
    async fn latest_appended_version_wins() {
        let store = MemoryStore::new();
        let mut t = Ticket {
            issue_key: "T-1".into(),
            subject: "first".into(),
            ..Default::default()
        };
        store.append_tickets(&[t.clone()]).await.unwrap();
        t.subject = "second".into();
        store.append_tickets(&[t]).await.unwrap();
        let latest = store.latest_ticket("T-1").await.unwrap().unwrap();
        assert_eq!(latest.subject, "second");
        assert!(store.latest_ticket("T-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn limit_caps_rows() {
        let store = MemoryStore::new();
        store.insert_recommendation(rec(&["a", "b", "c"], 500));
        assert_eq!(store.query_for_reconciliation(&query(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_commit_writes_nothing() {
        let store = MemoryStore::new();
        store.set_fail_commits(true);
        let t = Ticket {
            issue_key: "T-1".into(),
            ..Default::default()
        };
        assert!(store.append_tickets(&[t]).await.is_err());
        assert!(store.ticket_rows().is_empty());
    }

    #[tokio::test]
    async fn keyless_ticket_rejects_whole_batch() {
        let store = MemoryStore::new();
        let good = Ticket {
            issue_key: "T-1".into(),
            ..Default::default()
        };
        let err = store
            .append_tickets(&[good, Ticket::default()])
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::Commit(_)));
        assert!(store.ticket_rows().is_empty());
    }
}
