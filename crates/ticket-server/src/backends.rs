//! Compile-time registry of ticket backends, selected by name at startup.

use std::sync::Arc;

use ticket_core::backend::{LogBackend, TicketBackend};
use ticket_core::config::ServiceConfig;
use ticket_core::store::TicketStore;
use ticket_core::{Result, TicketError};
use ticket_slack::SlackBackend;

/// Every name [`build_backend`] accepts.
pub const BACKEND_NAMES: &[&str] = &["log", "slack"];

pub fn build_backend(
    name: &str,
    config: &ServiceConfig,
    store: Arc<dyn TicketStore>,
) -> Result<Arc<dyn TicketBackend>> {
    match name {
        "log" => Ok(Arc::new(LogBackend::new(store))),
        "slack" => Ok(Arc::new(SlackBackend::new(&config.slack, store)?)),
        other => Err(TicketError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_core::store::MemoryStore;

    #[test]
    fn log_backend_is_registered() {
        let b = build_backend("log", &ServiceConfig::default(), Arc::new(MemoryStore::new()))
            .unwrap();
        assert_eq!(b.name(), "log");
    }

    #[test]
    fn slack_without_token_fails() {
        let err = build_backend("slack", &ServiceConfig::default(), Arc::new(MemoryStore::new()))
            .err()
            .unwrap();
        assert!(matches!(err, TicketError::Config(_)));
    }

    #[test]
    fn unknown_name_fails() {
        let err = build_backend("jira", &ServiceConfig::default(), Arc::new(MemoryStore::new()))
            .err()
            .unwrap();
        assert!(matches!(err, TicketError::UnknownBackend(n) if n == "jira"));
    }

    #[test]
    fn every_listed_name_is_known() {
        let mut cfg = ServiceConfig::default();
        cfg.slack.api_token = Some("xoxb-test".into());
        for name in BACKEND_NAMES {
            let b = build_backend(name, &cfg, Arc::new(MemoryStore::new())).unwrap();
            assert_eq!(b.name(), *name);
        }
    }
}
