//! Postgres system of record.
//!
//! # Tables
//!
//! - `recommendations`: exported recommendations, `target_resources` is a
//!   `text[]` flattened with `unnest` at query time
//! - `routing`: ownership rows, label sets stored as `text[]` so the label
//!   tier is a single `&&` overlap test
//! - `tickets`: append-only; `id BIGSERIAL` orders versions, the highest
//!   `id` per issue key (or per target resource) is the current ticket
//!
//! Batch commits run inside one transaction and are chunked into multi-row
//! `INSERT`s of at most [`BATCH_CHUNK`] rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use super::schema::{self, TableSchema};
use super::{RecommendationSource, ReconcileQuery, RoutingStore, TicketStore};
use crate::error::{Result, TicketError};
use crate::types::{RecommendationRow, RoutingRow, Ticket, TicketStatus};

/// Upper bound on rows per `INSERT` statement inside a batch commit.
pub const BATCH_CHUNK: usize = 500;

/// Column prefix used for the joined ticket in the reconciliation query.
const JOINED_TICKET_PREFIX: &str = "t_";

fn query_err(e: sqlx::Error) -> TicketError {
    TicketError::Query(e.to_string())
}

fn commit_err(e: sqlx::Error) -> TicketError {
    TicketError::Commit(e.to_string())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(query_err)?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| TicketError::Schema(e.to_string()))?;
        tracing::info!("schema migrations applied");
        Ok(())
    }

    /// Check every declared column table against the live schema.
    pub async fn verify_schema(&self) -> Result<()> {
        for table in schema::ALL_TABLES {
            self.verify_table(table).await?;
        }
        Ok(())
    }

    async fn verify_table(&self, table: &TableSchema) -> Result<()> {
        let present: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name = $1
            "#,
        )
        .bind(table.name)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        if present.is_empty() {
            return Err(TicketError::Schema(format!(
                "table '{}' does not exist; run `ticketd migrate`",
                table.name
            )));
        }
        let missing = table.missing_from(&present);
        if !missing.is_empty() {
            return Err(TicketError::Schema(format!(
                "table '{}' is missing columns: {}",
                table.name,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    fn reconciliation_sql() -> String {
        format!(
            r#"
            SELECT r.project_name, r.project_id, r.recommender_name, r.recommender_subtype,
                   r.location, r.impact_cost_unit, r.impact_currency_code, r.description,
                   r.labels, tr.target_resource,
                   {ticket_columns}
            FROM recommendations AS r
            CROSS JOIN LATERAL unnest(r.target_resources) AS tr(target_resource)
            LEFT JOIN (
                SELECT DISTINCT ON (target_resource) *
                FROM tickets
                ORDER BY target_resource, id DESC
            ) AS t ON t.target_resource = tr.target_resource
            WHERE (t.issue_key IS NULL OR $1 >= t.snooze_date)
              AND (r.impact_cost_unit >= $2 OR ($3 AND r.impact_cost_unit IS NULL))
              AND NOT (r.recommender_subtype = ANY($4))
            ORDER BY r.id, tr.target_resource
            LIMIT $5
            "#,
            ticket_columns = schema::TICKETS.aliased_column_list("t", JOINED_TICKET_PREFIX),
        )
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn opt_string(row: &PgRow, column: &str) -> Result<String> {
    Ok(row
        .try_get::<Option<String>, _>(column)
        .map_err(query_err)?
        .unwrap_or_default())
}

fn opt_strings(row: &PgRow, column: &str) -> Result<Vec<String>> {
    Ok(row
        .try_get::<Option<Vec<String>>, _>(column)
        .map_err(query_err)?
        .unwrap_or_default())
}

fn opt_time(row: &PgRow, column: &str) -> Result<DateTime<Utc>> {
    Ok(row
        .try_get::<Option<DateTime<Utc>>, _>(column)
        .map_err(query_err)?
        .unwrap_or_default())
}

/// Decode a ticket whose columns carry `prefix`. NULL columns (from a LEFT
/// JOIN miss) decode to the sentinel's zero values.
fn decode_ticket(row: &PgRow, prefix: &str) -> Result<Ticket> {
    let c = |name: &str| format!("{prefix}{name}");
    let status = row
        .try_get::<Option<String>, _>(c("status").as_str())
        .map_err(query_err)?
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<TicketStatus>())
        .transpose()?;
    Ok(Ticket {
        issue_key: opt_string(row, &c("issue_key"))?,
        target_contact: opt_string(row, &c("target_contact"))?,
        creation_date: opt_time(row, &c("creation_date"))?,
        status,
        target_resource: opt_string(row, &c("target_resource"))?,
        recommender_id: opt_string(row, &c("recommender_id"))?,
        last_update_date: opt_time(row, &c("last_update_date"))?,
        last_ping_date: opt_time(row, &c("last_ping_date"))?,
        snooze_date: opt_time(row, &c("snooze_date"))?,
        subject: opt_string(row, &c("subject"))?,
        assignee: opt_strings(row, &c("assignee"))?,
    })
}

fn decode_recommendation_row(row: &PgRow) -> Result<RecommendationRow> {
    Ok(RecommendationRow {
        project_name: opt_string(row, "project_name")?,
        project_id: opt_string(row, "project_id")?,
        recommender_name: opt_string(row, "recommender_name")?,
        recommender_subtype: opt_string(row, "recommender_subtype")?,
        location: opt_string(row, "location")?,
        impact_cost_unit: row.try_get("impact_cost_unit").map_err(query_err)?,
        impact_currency_code: row.try_get("impact_currency_code").map_err(query_err)?,
        description: opt_string(row, "description")?,
        target_resource: opt_string(row, "target_resource")?,
        labels: opt_string(row, "labels")?,
        ticket: decode_ticket(row, JOINED_TICKET_PREFIX)?,
    })
}

fn decode_routing_row(row: &PgRow) -> Result<RoutingRow> {
    Ok(RoutingRow {
        target: opt_string(row, "target")?,
        project_id: opt_string(row, "project_id")?,
        device_names_or_labels: opt_strings(row, "device_names_or_labels")?,
        ticket_system_identifiers: opt_strings(row, "ticket_system_identifiers")?,
    })
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

#[async_trait]
impl RecommendationSource for PgStore {
    async fn query_for_reconciliation(
        &self,
        query: &ReconcileQuery,
    ) -> Result<Vec<RecommendationRow>> {
        let sql = Self::reconciliation_sql();
        let rows = sqlx::query(&sql)
            .bind(query.now)
            .bind(query.cost_threshold)
            .bind(query.allow_null_cost)
            .bind(&query.exclude_subtypes)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;
        rows.iter().map(decode_recommendation_row).collect()
    }
}

#[async_trait]
impl RoutingStore for PgStore {
    async fn routing_by_labels(
        &self,
        project_id: &str,
        labels: &[String],
    ) -> Result<Vec<RoutingRow>> {
        let sql = format!(
            "SELECT {} FROM routing WHERE project_id = $1 AND device_names_or_labels && $2 ORDER BY id LIMIT 1",
            schema::ROUTING.column_list()
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(labels)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;
        rows.iter().map(decode_routing_row).collect()
    }

    async fn routing_by_project(&self, project_id: &str) -> Result<Vec<RoutingRow>> {
        let sql = format!(
            "SELECT {} FROM routing WHERE project_id = $1 ORDER BY id LIMIT 1",
            schema::ROUTING.column_list()
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;
        rows.iter().map(decode_routing_row).collect()
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn append_tickets(&self, tickets: &[Ticket]) -> Result<usize> {
        if tickets.is_empty() {
            return Ok(0);
        }
        if let Some(t) = tickets.iter().find(|t| !t.exists()) {
            return Err(TicketError::Commit(format!(
                "ticket for '{}' has no issue key",
                t.target_resource
            )));
        }

        let mut tx = self.pool.begin().await.map_err(commit_err)?;
        let mut written = 0usize;
        for chunk in tickets.chunks(BATCH_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                schema::TICKETS.name,
                schema::TICKETS.column_list()
            ));
            qb.push_values(chunk, |mut b, t| {
                b.push_bind(t.issue_key.clone())
                    .push_bind(t.target_contact.clone())
                    .push_bind(t.creation_date)
                    .push_bind(t.status.map(|s| s.as_str().to_string()))
                    .push_bind(t.target_resource.clone())
                    .push_bind(t.recommender_id.clone())
                    .push_bind(t.last_update_date)
                    .push_bind(t.last_ping_date)
                    .push_bind(t.snooze_date)
                    .push_bind(t.subject.clone())
                    .push_bind(t.assignee.clone());
            });
            let result = qb.build().execute(&mut *tx).await.map_err(commit_err)?;
            written += result.rows_affected() as usize;
        }
        // Dropping `tx` on any early return above rolls the whole batch back.
        tx.commit().await.map_err(commit_err)?;
        tracing::info!(rows = written, "committed ticket batch");
        Ok(written)
    }

    async fn latest_ticket(&self, issue_key: &str) -> Result<Option<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE issue_key = $1 ORDER BY id DESC LIMIT 1",
            schema::TICKETS.column_list()
        );
        let row = sqlx::query(&sql)
            .bind(issue_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;
        row.as_ref().map(|r| decode_ticket(r, "")).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_sql_selects_prefixed_ticket_columns() {
        let sql = PgStore::reconciliation_sql();
        assert!(sql.contains("t.issue_key AS t_issue_key"));
        assert!(sql.contains("t.assignee AS t_assignee"));
        assert!(sql.contains("DISTINCT ON (target_resource)"));
        assert!(sql.contains("LIMIT $5"));
    }
}
