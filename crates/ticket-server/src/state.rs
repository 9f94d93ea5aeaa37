use std::sync::Arc;

use ticket_core::backend::TicketBackend;
use ticket_core::config::ServiceConfig;
use ticket_core::reconcile::Reconciler;
use ticket_core::store::{MemoryStore, PgStore, Store, TicketStore};

use crate::backends::build_backend;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub backend: Arc<dyn TicketBackend>,
    pub tickets: Arc<dyn TicketStore>,
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        backend: Arc<dyn TicketBackend>,
        config: ServiceConfig,
    ) -> Self {
        let tickets: Arc<dyn TicketStore> = store.clone();
        let reconciler = Reconciler::new(store, backend.clone(), config.reconcile.clone());
        Self {
            reconciler: Arc::new(reconciler),
            backend,
            tickets,
            config: Arc::new(config),
        }
    }

    /// Validate `config`, open the store it names, build and initialize the
    /// configured backend.
    pub async fn from_config(config: ServiceConfig) -> anyhow::Result<Self> {
        config.ensure_valid()?;
        match config.database_url.clone() {
            Some(url) => {
                let store = Arc::new(PgStore::connect(&url).await?);
                store.verify_schema().await?;
                Self::with_store(store, config).await
            }
            None => {
                tracing::warn!("no database configured; using in-memory ticket store");
                Self::with_store(Arc::new(MemoryStore::new()), config).await
            }
        }
    }

    /// Build and initialize the configured backend on top of `store`.
    pub async fn with_store<S: Store + 'static>(
        store: Arc<S>,
        config: ServiceConfig,
    ) -> anyhow::Result<Self> {
        let backend = build_backend(&config.backend, &config, store.clone())?;
        backend.init().await?;
        tracing::info!(backend = backend.name(), "ticket backend ready");
        Ok(Self::new(store, backend, config))
    }
}
