// 🔧 Wiring - Build every component from one Config
//
// Local mode: SQLite record store + SQLite sandbox cloud on the same database
// file (separate connections, WAL handles the sharing).

use crate::change_feed::FeedProcessor;
use crate::config::Config;
use crate::db::SqliteRecordStore;
use crate::error::StoreError;
use crate::guardrail::GuardrailManager;
use crate::monitor::GuardrailMonitor;
use crate::provisioning::ProvisioningOrchestrator;
use crate::registration::RegistrationGate;
use crate::sandbox::SandboxCloud;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber; RUST_LOG overrides `log_level`
pub fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[derive(Clone)]
pub struct Services {
    pub config: Config,
    pub store: Arc<SqliteRecordStore>,
    pub cloud: Arc<SandboxCloud>,
    pub gate: Arc<RegistrationGate>,
    pub orchestrator: Arc<ProvisioningOrchestrator>,
    pub feed: Arc<FeedProcessor>,
    pub monitor: Arc<GuardrailMonitor>,
}

impl Services {
    /// Open (or create) the database at `config.store.database_path`
    pub fn local(config: Config) -> Result<Self, StoreError> {
        let path = config.store.database_path.clone();
        info!(path = %path.display(), table = %config.store.table_name, "opening local database");

        let store = SqliteRecordStore::new(Connection::open(&path)?, &config.store.table_name)?;
        let cloud = SandboxCloud::open(&path)?;
        Ok(Self::assemble(config, store, cloud))
    }

    /// Everything in memory; nothing survives the process
    pub fn in_memory(config: Config) -> Result<Self, StoreError> {
        let store = SqliteRecordStore::open_in_memory(&config.store.table_name)?;
        let cloud = SandboxCloud::open_in_memory()?;
        Ok(Self::assemble(config, store, cloud))
    }

    fn assemble(config: Config, store: SqliteRecordStore, cloud: SandboxCloud) -> Self {
        let store = Arc::new(store);
        let cloud = Arc::new(cloud);
        let retry = config.retry;

        let gate = RegistrationGate::new(store.clone(), retry).with_audit(store.clone());

        let guardrails = GuardrailManager::new(cloud.clone(), config.guardrail.clone(), retry);
        let orchestrator = Arc::new(
            ProvisioningOrchestrator::new(
                cloud.clone(),
                guardrails,
                cloud.clone(),
                config.provisioning.clone(),
                retry,
            )
            .with_audit(store.clone()),
        );

        let feed = FeedProcessor::new(store.clone(), orchestrator.clone(), config.feed.batch_size, retry);

        let monitor = GuardrailMonitor::new(
            cloud.clone(),
            cloud.clone(),
            cloud.clone(),
            &config.guardrail.alert_topic,
            config.monitor.clone(),
            retry,
        );

        Services {
            config,
            store,
            cloud,
            gate: Arc::new(gate),
            orchestrator,
            feed: Arc::new(feed),
            monitor: Arc::new(monitor),
        }
    }
}
