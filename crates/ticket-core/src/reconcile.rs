//! Reconciliation pass: recommendation rows in, one committed ticket batch out.
//!
//! ```text
//! rows ──► one task per row (semaphore-gated, per-row deadline)
//!            │  existing ticket → refresh snooze, no backend call
//!            │  no ticket       → resolve routing → backend.create_ticket
//!            ▼
//!          mpsc channel ──► single collector (join = channel closed)
//!                               │
//!                               ▼
//!                     store.append_tickets(staged)   (once, atomic)
//! ```
//!
//! Unroutable rows, backend failures and row timeouts only drop their own
//! row. Query failures (including malformed routing labels) and commit
//! failures fail the whole pass and nothing from it is committed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::backend::TicketBackend;
use crate::config::ReconcileConfig;
use crate::error::{Result, TicketError};
use crate::routing::resolve_routing;
use crate::store::{ReconcileQuery, Store};
use crate::types::{RecommendationRow, Ticket};

/// Counts for one pass. Row-level skips show up here and in the logs only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub considered: usize,
    pub refreshed: usize,
    pub created: usize,
    pub unroutable: usize,
    pub failed: usize,
    pub committed: usize,
}

#[derive(Debug)]
enum RowOutcome {
    Refreshed(Ticket),
    Created(Ticket),
    Unroutable,
    Failed,
    /// A pass-level failure discovered inside a row task.
    Fatal(TicketError),
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    backend: Arc<dyn TicketBackend>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        backend: Arc<dyn TicketBackend>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Query for candidate rows and reconcile them.
    pub async fn run_pass(&self) -> Result<ReconcileReport> {
        let now = Utc::now();
        let query = ReconcileQuery::from_config(&self.config, now);
        tracing::info!(
            cost_threshold = query.cost_threshold,
            limit = query.limit,
            "querying for tickets to reconcile"
        );
        let rows = self.store.query_for_reconciliation(&query).await?;
        self.reconcile_at(rows, now).await
    }

    pub async fn reconcile(&self, rows: Vec<RecommendationRow>) -> Result<ReconcileReport> {
        self.reconcile_at(rows, Utc::now()).await
    }

    /// Reconcile `rows` as of `now`.
    pub async fn reconcile_at(
        &self,
        rows: Vec<RecommendationRow>,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            considered: rows.len(),
            ..Default::default()
        };
        if rows.is_empty() {
            tracing::info!("no recommendations need tickets");
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let row_timeout = self.config.row_timeout();
        // Capacity covers every row so a send never waits on the collector.
        let (tx, mut rx) = mpsc::channel::<RowOutcome>(rows.len());
        let mut tasks = JoinSet::new();

        for row in rows {
            let tx = tx.clone();
            let sem = semaphore.clone();
            let store = self.store.clone();
            let backend = self.backend.clone();
            tasks.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => {
                        let _ = tx.send(RowOutcome::Failed).await;
                        return;
                    }
                };
                let target_resource = row.target_resource.clone();
                let project_id = row.project_id.clone();
                let work = process_row(store.as_ref(), backend.as_ref(), row, now);
                let outcome = match tokio::time::timeout(row_timeout, work).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let err = TicketError::Timeout(row_timeout.as_secs());
                        tracing::warn!(
                            %target_resource,
                            %project_id,
                            error = %err,
                            "row did not finish; skipping"
                        );
                        RowOutcome::Failed
                    }
                };
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut staged: Vec<Ticket> = Vec::new();
        let mut fatal: Option<TicketError> = None;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                RowOutcome::Refreshed(t) => {
                    report.refreshed += 1;
                    staged.push(t);
                }
                RowOutcome::Created(t) => {
                    report.created += 1;
                    staged.push(t);
                }
                RowOutcome::Unroutable => report.unroutable += 1,
                RowOutcome::Failed => report.failed += 1,
                RowOutcome::Fatal(e) => {
                    report.failed += 1;
                    fatal.get_or_insert(e);
                }
            }
        }

        // Every sender is gone, so every task has finished; this only
        // surfaces tasks that panicked before reporting.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "reconcile task aborted");
                report.failed += 1;
            }
        }

        if let Some(e) = fatal {
            tracing::error!(error = %e, "reconciliation pass failed; nothing committed");
            return Err(e);
        }

        if !staged.is_empty() {
            report.committed = self.store.append_tickets(&staged).await.map_err(|e| {
                tracing::error!(error = %e, staged = staged.len(), "ticket batch commit failed");
                e
            })?;
        }

        tracing::info!(
            considered = report.considered,
            refreshed = report.refreshed,
            created = report.created,
            unroutable = report.unroutable,
            failed = report.failed,
            committed = report.committed,
            "reconciliation pass complete"
        );
        Ok(report)
    }
}

async fn process_row(
    store: &dyn Store,
    backend: &dyn TicketBackend,
    row: RecommendationRow,
    now: DateTime<Utc>,
) -> RowOutcome {
    if row.ticket.exists() {
        let mut ticket = row.ticket.clone();
        ticket.refresh(&row.recommender_name, now);
        tracing::debug!(issue_key = %ticket.issue_key, "ticket already exists; refreshed snooze");
        return RowOutcome::Refreshed(ticket);
    }

    let routing = match resolve_routing(store, &row.project_id, &row.target_resource, &row.labels)
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(
                target_resource = %row.target_resource,
                project_id = %row.project_id,
                error = %e,
                "routing lookup failed"
            );
            return RowOutcome::Fatal(e);
        }
    };

    let Some(route) = routing.first() else {
        tracing::warn!(
            target_resource = %row.target_resource,
            project_id = %row.project_id,
            "no routing rows found; skipping"
        );
        return RowOutcome::Unroutable;
    };

    let mut ticket = Ticket::for_new_recommendation(&row, route, now);
    match backend.create_ticket(&mut ticket, &row).await {
        Ok(issue_key) => {
            tracing::info!(
                %issue_key,
                target_resource = %row.target_resource,
                contact = %ticket.target_contact,
                "created ticket"
            );
            ticket.issue_key = issue_key;
            RowOutcome::Created(ticket)
        }
        Err(e) => {
            tracing::warn!(
                target_resource = %row.target_resource,
                project_id = %row.project_id,
                error = %e,
                "failed to create ticket; skipping"
            );
            RowOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{WebhookReply, WebhookRequest};
    use crate::store::{MemoryStore, RecommendationRecord, TicketStore};
    use crate::types::{RoutingRow, TicketStatus};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // -----------------------------------------------------------------------
    // Test backend
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct MockBackend {
        creates: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_for: Vec<String>,
        delay: Option<Duration>,
    }

    impl MockBackend {
        fn failing_for(resource: &str) -> Self {
            Self {
                fail_for: vec![resource.to_string()],
                ..Default::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TicketBackend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn init(&self) -> Result<()> {
            Ok(())
        }

        async fn create_ticket(
            &self,
            ticket: &mut Ticket,
            _row: &RecommendationRow,
        ) -> Result<String> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            let now_in = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in, Ordering::SeqCst);
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail_for.contains(&ticket.target_resource) {
                return Err(TicketError::Backend("backend outage".into()));
            }
            Ok(format!("T-{n}"))
        }

        async fn update_ticket(&self, _: &mut Ticket, _: &RecommendationRow) -> Result<()> {
            Ok(())
        }

        async fn close_ticket(&self, _: &str) -> Result<()> {
            Ok(())
        }

        async fn get_ticket(&self, issue_key: &str) -> Result<Ticket> {
            Err(TicketError::TicketNotFound(issue_key.into()))
        }

        async fn handle_webhook_action(&self, _: WebhookRequest) -> Result<WebhookReply> {
            Ok(WebhookReply::Ack)
        }
    }

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    fn jan_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn row(resource: &str, project: &str) -> RecommendationRow {
        RecommendationRow {
            project_name: "Project".into(),
            project_id: project.into(),
            recommender_name: "google.compute.instance.MachineTypeRecommender".into(),
            recommender_subtype: "CHANGE_MACHINE_TYPE".into(),
            target_resource: resource.into(),
            labels: "[]".into(),
            ..Default::default()
        }
    }

    fn routed_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_routing(RoutingRow {
            target: "alice".into(),
            project_id: "proj".into(),
            device_names_or_labels: vec![],
            ticket_system_identifiers: vec!["U-ALICE".into()],
        });
        store
    }

    fn reconciler(
        store: Arc<MemoryStore>,
        backend: Arc<MockBackend>,
        config: ReconcileConfig,
    ) -> Reconciler {
        Reconciler::new(store, backend, config)
    }

    // -----------------------------------------------------------------------
    // Scenarios
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn new_routable_row_creates_and_commits_ticket() {
        let store = routed_store();
        let backend = Arc::new(MockBackend::default());
        let r = reconciler(store.clone(), backend.clone(), ReconcileConfig::default());

        let report = r
            .reconcile_at(vec![row("vm-1", "proj")], jan_first())
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.committed, 1);
        let rows = store.ticket_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, Some(TicketStatus::New));
        assert_eq!(rows[0].issue_key, "T-1");
        assert_eq!(rows[0].target_contact, "alice");
        assert_eq!(rows[0].assignee, vec!["U-ALICE".to_string()]);
    }

    #[tokio::test]
    async fn existing_ticket_is_refreshed_without_backend_call() {
        let store = routed_store();
        let backend = Arc::new(MockBackend::default());
        let r = reconciler(store.clone(), backend.clone(), ReconcileConfig::default());

        let mut existing = row("vm-9", "proj");
        existing.ticket = Ticket {
            issue_key: "T-9".into(),
            target_resource: "vm-9".into(),
            snooze_date: jan_first(),
            ..Default::default()
        };
        let report = r.reconcile_at(vec![existing], jan_first()).await.unwrap();

        assert_eq!(report.refreshed, 1);
        assert_eq!(backend.creates.load(Ordering::SeqCst), 0);
        let rows = store.ticket_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].issue_key, "T-9");
        assert_eq!(
            rows[0].snooze_date,
            Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
        );
        assert_eq!(
            rows[0].recommender_id,
            "google.compute.instance.MachineTypeRecommender"
        );
    }

    #[tokio::test]
    async fn unroutable_row_is_dropped_and_pass_succeeds() {
        let store = routed_store();
        let backend = Arc::new(MockBackend::default());
        let r = reconciler(store.clone(), backend, ReconcileConfig::default());

        let report = r
            .reconcile(vec![row("vm-lost", "nobody"), row("vm-2", "proj")])
            .await
            .unwrap();

        assert_eq!(report.unroutable, 1);
        assert_eq!(report.committed, 1);
        let rows = store.ticket_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target_resource, "vm-2");
    }

    #[tokio::test]
    async fn backend_failure_only_drops_its_row() {
        let store = routed_store();
        let backend = Arc::new(MockBackend::failing_for("vm-bad"));
        let r = reconciler(store.clone(), backend, ReconcileConfig::default());

        let report = r
            .reconcile(vec![
                row("vm-a", "proj"),
                row("vm-bad", "proj"),
                row("vm-b", "proj"),
            ])
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 2);
        let mut committed: Vec<_> = store
            .ticket_rows()
            .into_iter()
            .map(|t| t.target_resource)
            .collect();
        committed.sort();
        assert_eq!(committed, vec!["vm-a", "vm-b"]);
        assert_eq!(store.append_calls(), 1);
    }

    #[tokio::test]
    async fn failed_commit_leaves_nothing_visible() {
        let store = routed_store();
        store.set_fail_commits(true);
        let backend = Arc::new(MockBackend::default());
        let r = reconciler(store.clone(), backend.clone(), ReconcileConfig::default());

        let err = r
            .reconcile(vec![row("vm-1", "proj"), row("vm-2", "proj")])
            .await
            .unwrap_err();

        assert!(matches!(err, TicketError::Commit(_)));
        assert_eq!(backend.creates.load(Ordering::SeqCst), 2);
        assert_eq!(store.append_calls(), 1);
        for key in ["T-1", "T-2"] {
            assert!(store.latest_ticket(key).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn malformed_labels_fail_the_pass_without_commit() {
        let store = routed_store();
        let backend = Arc::new(MockBackend::default());
        let r = reconciler(store.clone(), backend, ReconcileConfig::default());

        let mut bad = row("vm-bad", "proj");
        bad.labels = "not json".into();
        let err = r
            .reconcile(vec![bad, row("vm-ok", "proj")])
            .await
            .unwrap_err();

        assert!(matches!(err, TicketError::InvalidLabels { .. }));
        assert!(store.ticket_rows().is_empty());
        assert_eq!(store.append_calls(), 0);
    }

    #[tokio::test]
    async fn empty_batch_skips_commit() {
        let store = routed_store();
        store.set_fail_commits(true);
        let r = reconciler(
            store.clone(),
            Arc::new(MockBackend::default()),
            ReconcileConfig::default(),
        );
        let report = r.reconcile(Vec::new()).await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(store.append_calls(), 0);
    }

    #[tokio::test]
    async fn all_rows_failing_skips_commit() {
        let store = routed_store();
        store.set_fail_commits(true);
        let r = reconciler(
            store.clone(),
            Arc::new(MockBackend::failing_for("vm-1")),
            ReconcileConfig::default(),
        );
        let report = r.reconcile(vec![row("vm-1", "proj")]).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.committed, 0);
        assert_eq!(store.append_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out_as_row_failure() {
        let store = routed_store();
        let backend = Arc::new(MockBackend::slow(Duration::from_secs(120)));
        let config = ReconcileConfig {
            row_timeout_secs: 5,
            ..Default::default()
        };
        let r = reconciler(store.clone(), backend, config);

        let mut existing = row("vm-old", "proj");
        existing.ticket.issue_key = "T-OLD".into();
        let report = r
            .reconcile(vec![row("vm-1", "proj"), existing])
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.refreshed, 1);
        let rows = store.ticket_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].issue_key, "T-OLD");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let store = routed_store();
        let backend = Arc::new(MockBackend::slow(Duration::from_millis(50)));
        let config = ReconcileConfig {
            max_concurrency: 2,
            ..Default::default()
        };
        let r = reconciler(store.clone(), backend.clone(), config);

        let rows = (0..6).map(|i| row(&format!("vm-{i}"), "proj")).collect();
        let report = r.reconcile(rows).await.unwrap();

        assert_eq!(report.created, 6);
        assert!(backend.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(store.ticket_rows().len(), 6);
        assert_eq!(store.append_calls(), 1);
    }

    #[tokio::test]
    async fn run_pass_skips_snoozed_tickets_on_second_pass() {
        let store = routed_store();
        store.insert_recommendation(RecommendationRecord {
            project_id: "proj".into(),
            recommender_name: "rec".into(),
            recommender_subtype: "CHANGE_MACHINE_TYPE".into(),
            impact_cost_unit: Some(250),
            target_resources: vec!["vm-1".into()],
            labels: "[]".into(),
            ..Default::default()
        });
        let backend = Arc::new(MockBackend::default());
        let r = reconciler(store.clone(), backend.clone(), ReconcileConfig::default());

        let first = r.run_pass().await.unwrap();
        assert_eq!(first.created, 1);

        let second = r.run_pass().await.unwrap();
        assert_eq!(second.considered, 0);
        assert_eq!(backend.creates.load(Ordering::SeqCst), 1);
    }
}
