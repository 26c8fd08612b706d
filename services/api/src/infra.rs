use metrics_exporter_prometheus::PrometheusHandle;
use mindlab::assessment::{
    AdminAllowlist, MemoryStore, NarrativeGenerator, OllamaGenerator, SqliteStore, StoreError,
};
use mindlab::config::{AccessConfig, NarrativeConfig};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Store selected from configuration.
pub(crate) enum StoreChoice {
    Sqlite(Arc<SqliteStore>),
    Memory(Arc<MemoryStore>),
}

pub(crate) fn open_store(database: Option<&Path>) -> Result<StoreChoice, StoreError> {
    match database {
        Some(path) => {
            let store = SqliteStore::open(path)?;
            info!(path = %path.display(), "sqlite store opened");
            Ok(StoreChoice::Sqlite(Arc::new(store)))
        }
        None => {
            warn!("no database configured; sessions are kept in memory only");
            Ok(StoreChoice::Memory(Arc::new(MemoryStore::default())))
        }
    }
}

pub(crate) fn narrative_generator(config: &NarrativeConfig) -> Option<Arc<dyn NarrativeGenerator>> {
    match config.base_url.as_deref() {
        Some(base_url) => {
            info!(base_url, model = %config.model, "narrative enrichment enabled");
            Some(Arc::new(OllamaGenerator::new(
                base_url,
                &config.model,
                config.timeout(),
            )))
        }
        None => {
            info!("narrative enrichment disabled");
            None
        }
    }
}

pub(crate) fn admin_allowlist(config: &AccessConfig) -> AdminAllowlist {
    let admins = AdminAllowlist::new(config.admin_uids.iter().cloned());
    if admins.is_empty() {
        warn!("no admin ids configured; catalog sync over HTTP is disabled");
    }
    admins
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindlab::assessment::UserId;
    use std::time::Duration;

    #[test]
    fn generator_requires_base_url() {
        let mut config = NarrativeConfig {
            base_url: None,
            model: "llama3.1:8b".to_string(),
            timeout_secs: 5,
        };
        assert!(narrative_generator(&config).is_none());

        config.base_url = Some("http://localhost:11434/".to_string());
        let generator = narrative_generator(&config).expect("generator configured");
        assert_eq!(generator.model(), "llama3.1:8b");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn allowlist_comes_from_access_config() {
        let config = AccessConfig {
            admin_uids: vec!["ops-1".to_string(), " ".to_string()],
        };
        let admins = admin_allowlist(&config);
        assert_eq!(admins.len(), 1);
        assert!(admins.is_admin(&UserId("ops-1".to_string())));
    }

    #[test]
    fn missing_database_selects_memory_store() {
        assert!(matches!(open_store(None), Ok(StoreChoice::Memory(_))));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mindlab.db");
        assert!(matches!(open_store(Some(&path)), Ok(StoreChoice::Sqlite(_))));
    }
}
