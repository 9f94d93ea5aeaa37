use crate::error::{Result, TicketError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ReconcileConfig
// ---------------------------------------------------------------------------

/// Knobs for one reconciliation pass: which recommendations qualify and how
/// hard the pass may lean on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_cost_threshold")]
    pub cost_threshold: i64,
    #[serde(default)]
    pub allow_null_cost: bool,
    #[serde(default)]
    pub exclude_subtypes: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_row_timeout_secs")]
    pub row_timeout_secs: u64,
}

fn default_cost_threshold() -> i64 {
    100
}

fn default_limit() -> i64 {
    5
}

fn default_max_concurrency() -> usize {
    8
}

fn default_row_timeout_secs() -> u64 {
    30
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            cost_threshold: default_cost_threshold(),
            allow_null_cost: false,
            exclude_subtypes: Vec::new(),
            limit: default_limit(),
            max_concurrency: default_max_concurrency(),
            row_timeout_secs: default_row_timeout_secs(),
        }
    }
}

impl ReconcileConfig {
    pub fn row_timeout(&self) -> Duration {
        Duration::from_secs(self.row_timeout_secs)
    }
}

/// Split a comma separated subtype list, dropping blanks and the quotes the
/// old `' '` placeholder carried.
pub fn parse_subtype_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_matches('\'').trim_matches('"').trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// SlackConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
    /// One channel per ticket when true, one thread per ticket otherwise.
    #[serde(default = "default_channel_as_ticket")]
    pub channel_as_ticket: bool,
    #[serde(default = "default_slack_api_url")]
    pub api_url: String,
}

fn default_channel_as_ticket() -> bool {
    true
}

fn default_slack_api_url() -> String {
    "https://slack.com/api".to_string()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            signing_secret: None,
            channel_as_ticket: default_channel_as_ticket(),
            api_url: default_slack_api_url(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Postgres connection string. `None` runs against the in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

fn default_backend() -> String {
    "log".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            backend: default_backend(),
            port: default_port(),
            reconcile: ReconcileConfig::default(),
            slack: SlackConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load a YAML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TicketError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: ServiceConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.backend == "slack" {
            if self.slack.api_token.as_deref().unwrap_or("").is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "slack backend selected but SLACK_API_TOKEN is not set".into(),
                });
            }
            if self.slack.signing_secret.as_deref().unwrap_or("").is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "slack backend selected but SLACK_SIGNING_SECRET is not set".into(),
                });
            }
        }

        if self.reconcile.limit <= 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "reconcile.limit is {}; passes will never pick up recommendations",
                    self.reconcile.limit
                ),
            });
        }

        if self.reconcile.max_concurrency == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "reconcile.max_concurrency must be at least 1".into(),
            });
        }

        if self.reconcile.row_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "reconcile.row_timeout_secs must be at least 1".into(),
            });
        }

        if self.database_url.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "DATABASE_URL not set; tickets are kept in memory only".into(),
            });
        }

        warnings
    }

    /// `Err` with every error-level message joined, `Ok` otherwise.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TicketError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_service_defaults() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.backend, "log");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.reconcile.cost_threshold, 100);
        assert_eq!(cfg.reconcile.limit, 5);
        assert!(!cfg.reconcile.allow_null_cost);
        assert!(cfg.slack.channel_as_ticket);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "backend: slack\nreconcile:\n  limit: 20\n";
        let cfg: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.backend, "slack");
        assert_eq!(cfg.reconcile.limit, 20);
        assert_eq!(cfg.reconcile.cost_threshold, 100);
        assert_eq!(cfg.slack.api_url, "https://slack.com/api");
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ticketd.yaml");
        std::fs::write(&path, "reconcile:\n  exclude_subtypes: [CHANGE_MACHINE_TYPE]\n").unwrap();
        let mut expected = ServiceConfig::default();
        expected.reconcile.exclude_subtypes = vec!["CHANGE_MACHINE_TYPE".into()];
        assert_eq!(ServiceConfig::load(&path).unwrap(), expected);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = ServiceConfig::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, TicketError::Config(_)));
    }

    #[test]
    fn slack_without_credentials_is_an_error() {
        let cfg = ServiceConfig {
            backend: "slack".into(),
            ..Default::default()
        };
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(cfg.ensure_valid().is_err());
    }

    #[test]
    fn default_config_is_valid_with_memory_warning() {
        let cfg = ServiceConfig::default();
        assert!(cfg.ensure_valid().is_ok());
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("DATABASE_URL")));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cfg = ServiceConfig::default();
        cfg.reconcile.max_concurrency = 0;
        assert!(cfg.ensure_valid().is_err());
    }

    #[test]
    fn subtype_list_parsing() {
        assert_eq!(
            parse_subtype_list("CHANGE_MACHINE_TYPE, 'STOP_VM' ,,"),
            vec!["CHANGE_MACHINE_TYPE".to_string(), "STOP_VM".to_string()]
        );
        assert!(parse_subtype_list("' '").is_empty());
    }
}
