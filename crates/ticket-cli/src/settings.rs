//! Effective configuration: YAML file (optional), then environment and flags.

use std::path::Path;

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::Args;
use ticket_core::config::{parse_subtype_list, ServiceConfig};

#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Postgres connection string (in-memory store when unset)
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Ticket backend: log or slack
    #[arg(long, global = true, env = "TICKET_SERVICE_IMPL")]
    pub backend: Option<String>,

    /// Minimum cost impact for a recommendation to get a ticket
    #[arg(long, global = true, env = "TICKET_COST_THRESHOLD")]
    pub cost_threshold: Option<i64>,

    /// Maximum rows picked up per pass
    #[arg(long, global = true, env = "TICKET_LIMIT")]
    pub limit: Option<i64>,

    /// Also ticket recommendations with no cost estimate
    #[arg(long, global = true, env = "ALLOW_NULL_COST", value_parser = BoolishValueParser::new())]
    pub allow_null_cost: Option<bool>,

    /// Comma separated recommender subtypes to skip
    #[arg(long, global = true, env = "EXCLUDE_SUB_TYPES")]
    pub exclude_subtypes: Option<String>,

    /// Rows processed at once during a pass
    #[arg(long, global = true, env = "RECONCILE_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Seconds a single row may take before it is skipped
    #[arg(long, global = true, env = "RECONCILE_ROW_TIMEOUT_SECS")]
    pub row_timeout_secs: Option<u64>,

    /// HTTP port for `serve`
    #[arg(long, global = true, env = "PORT")]
    pub port: Option<u16>,

    #[arg(long, global = true, env = "SLACK_API_TOKEN", hide_env_values = true)]
    pub slack_api_token: Option<String>,

    #[arg(long, global = true, env = "SLACK_SIGNING_SECRET", hide_env_values = true)]
    pub slack_signing_secret: Option<String>,

    /// One Slack channel per ticket (true) or one thread per ticket (false)
    #[arg(long, global = true, env = "SLACK_CHANNEL_AS_TICKET", value_parser = BoolishValueParser::new())]
    pub slack_channel_as_ticket: Option<bool>,

    #[arg(long, global = true, env = "SLACK_API_URL")]
    pub slack_api_url: Option<String>,
}

impl Overrides {
    pub fn apply(self, cfg: &mut ServiceConfig) {
        if let Some(v) = self.database_url.filter(|s| !s.is_empty()) {
            cfg.database_url = Some(v);
        }
        if let Some(v) = self.backend {
            cfg.backend = v;
        }
        if let Some(v) = self.cost_threshold {
            cfg.reconcile.cost_threshold = v;
        }
        if let Some(v) = self.limit {
            cfg.reconcile.limit = v;
        }
        if let Some(v) = self.allow_null_cost {
            cfg.reconcile.allow_null_cost = v;
        }
        if let Some(v) = self.exclude_subtypes {
            cfg.reconcile.exclude_subtypes = parse_subtype_list(&v);
        }
        if let Some(v) = self.concurrency {
            cfg.reconcile.max_concurrency = v;
        }
        if let Some(v) = self.row_timeout_secs {
            cfg.reconcile.row_timeout_secs = v;
        }
        if let Some(v) = self.port {
            cfg.port = v;
        }
        if let Some(v) = self.slack_api_token {
            cfg.slack.api_token = Some(v);
        }
        if let Some(v) = self.slack_signing_secret {
            cfg.slack.signing_secret = Some(v);
        }
        if let Some(v) = self.slack_channel_as_ticket {
            cfg.slack.channel_as_ticket = v;
        }
        if let Some(v) = self.slack_api_url {
            cfg.slack.api_url = v;
        }
    }
}

pub fn resolve(path: Option<&Path>, overrides: Overrides) -> anyhow::Result<ServiceConfig> {
    let mut cfg = match path {
        Some(p) => ServiceConfig::load(p).context("failed to load config")?,
        None => ServiceConfig::default(),
    };
    overrides.apply(&mut cfg);
    Ok(cfg)
}

/// Copy of `cfg` with secrets masked, for display.
pub fn redacted(cfg: &ServiceConfig) -> ServiceConfig {
    let mask = |v: &Option<String>| v.as_ref().map(|_| "********".to_string());
    let mut out = cfg.clone();
    out.database_url = mask(&cfg.database_url);
    out.slack.api_token = mask(&cfg.slack.api_token);
    out.slack.signing_secret = mask(&cfg.slack.signing_secret);
    out
}
