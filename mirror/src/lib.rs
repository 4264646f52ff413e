pub mod api;
pub mod cache;
pub mod config;
pub mod metrics_defs;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

use cache::{Cache, CacheError};
use config::{Config, StoreType, ValidationError};
use metrics_defs::{POPULATE_DURATION, POPULATE_ROWS};
use std::sync::Arc;
use std::time::Instant;
use store::{FilesystemStore, MemoryStore, Store, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ValidationError),
    #[error("could not open store: {0}")]
    Store(#[from] StoreError),
    #[error("cache population failed: {0}")]
    Population(#[from] CacheError),
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub fn get_store(store_type: &StoreType) -> Result<Arc<dyn Store>, StoreError> {
    match store_type {
        StoreType::Memory => Ok(Arc::new(MemoryStore::default())),
        StoreType::Filesystem { base_dir, filename } => {
            Ok(Arc::new(FilesystemStore::open(base_dir, filename)?))
        }
    }
}

/// Populates the cache from the configured store and serves the API until
/// the listener fails. A failed population leaves nothing to serve.
pub async fn run(config: Config) -> Result<(), MirrorError> {
    config.validate()?;
    let store = get_store(&config.store)?;

    let start = Instant::now();
    let cache = Cache::populate(store.as_ref()).await?;
    crate::histogram!(POPULATE_DURATION).record(start.elapsed().as_secs_f64());

    let counts = cache.counts();
    crate::histogram!(POPULATE_ROWS).record(counts.total() as f64);
    tracing::info!(
        pay_plans = counts.pay_plans,
        blockchains = counts.blockchains,
        applications = counts.applications,
        load_balancers = counts.load_balancers,
        "Cache populated"
    );

    let state = api::AppState::new(Arc::new(cache), store, config.api_keys);
    api::serve(&config.listener, state).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Listener;
    use store::Reader;

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let config = Config {
            listener: Listener::default(),
            api_keys: vec![],
            store: StoreType::Memory,
        };
        assert!(matches!(
            run(config).await,
            Err(MirrorError::InvalidConfig(ValidationError::NoApiKeys))
        ));
    }

    #[tokio::test]
    async fn test_get_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = get_store(&StoreType::Filesystem {
            base_dir: dir.path().to_string_lossy().into_owned(),
            filename: "portal.bin".into(),
        })
        .unwrap();
        assert_eq!(store.read_dataset().await.unwrap().rows(), 0);

        let store = get_store(&StoreType::Memory).unwrap();
        assert_eq!(store.read_dataset().await.unwrap().rows(), 0);
    }
}
