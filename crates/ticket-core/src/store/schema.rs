//! Declared column tables for the Postgres store.
//!
//! Row encoding and decoding go through these tables instead of positional
//! tuples, and [`PgStore::verify_schema`](super::PgStore::verify_schema)
//! checks them against `information_schema` at startup so a drifted schema
//! fails the process before the first pass runs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
}

const fn col(name: &'static str, sql_type: &'static str) -> Column {
    Column { name, sql_type }
}

#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl TableSchema {
    /// `a, b, c`
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `alias.a AS prefix_a, ...`
    pub fn aliased_column_list(&self, alias: &str, prefix: &str) -> String {
        self.columns
            .iter()
            .map(|c| format!("{alias}.{0} AS {prefix}{0}", c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Declared columns absent from `present`.
    pub fn missing_from(&self, present: &[String]) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|c| !present.iter().any(|p| p == c.name))
            .map(|c| c.name)
            .collect()
    }
}

pub const TICKETS: TableSchema = TableSchema {
    name: "tickets",
    columns: &[
        col("issue_key", "text"),
        col("target_contact", "text"),
        col("creation_date", "timestamptz"),
        col("status", "text"),
        col("target_resource", "text"),
        col("recommender_id", "text"),
        col("last_update_date", "timestamptz"),
        col("last_ping_date", "timestamptz"),
        col("snooze_date", "timestamptz"),
        col("subject", "text"),
        col("assignee", "text[]"),
    ],
};

pub const RECOMMENDATIONS: TableSchema = TableSchema {
    name: "recommendations",
    columns: &[
        col("project_name", "text"),
        col("project_id", "text"),
        col("recommender_name", "text"),
        col("recommender_subtype", "text"),
        col("location", "text"),
        col("impact_cost_unit", "bigint"),
        col("impact_currency_code", "text"),
        col("description", "text"),
        col("target_resources", "text[]"),
        col("labels", "text"),
    ],
};

pub const ROUTING: TableSchema = TableSchema {
    name: "routing",
    columns: &[
        col("target", "text"),
        col("project_id", "text"),
        col("device_names_or_labels", "text[]"),
        col("ticket_system_identifiers", "text[]"),
    ],
};

pub const ALL_TABLES: &[TableSchema] = &[RECOMMENDATIONS, ROUTING, TICKETS];
