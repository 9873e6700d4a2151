pub mod generator;
pub mod opensearch;
pub mod query;
pub mod sample;
pub mod schema;
pub mod sqlite;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use generator::{Generator, GeneratorStats, Mode};
pub use query::{AnomalyListing, QueryError, QueryService, Report};
pub use sample::{Sample, METRIC_NAME};
pub use store::{StoreError, TimeSeriesStore};

use crate::config::{StoreBackend, StoreConfig};
use anyhow::Result;
use std::sync::Arc;

/// Open the configured backend once; callers share the returned handle.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn TimeSeriesStore>> {
    let store: Arc<dyn TimeSeriesStore> = match config.backend {
        StoreBackend::Sqlite => {
            let path = config.sqlite_path();
            tracing::debug!(path = %path.display(), "opening sqlite store");
            Arc::new(sqlite::SqliteStore::open(&path, &config.series)?)
        }
        StoreBackend::Opensearch => {
            tracing::debug!(url = %config.opensearch.url, "opening opensearch store");
            Arc::new(opensearch::OpenSearchStore::new(&config.opensearch, &config.series)?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_configured_sqlite_backend() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            sqlite_path: tmp.path().join("t.db").display().to_string(),
            ..StoreConfig::default()
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.name(), "sqlite");
        assert_eq!(store.series(), "cpu-index");
        store.reset_series().await.unwrap();
        store.upsert(&Sample::new(1, 20.0, false)).await.unwrap();
        assert_eq!(store.latest(5).await.unwrap().len(), 1);
    }

    #[test]
    fn opens_configured_opensearch_backend() {
        let config = StoreConfig {
            backend: StoreBackend::Opensearch,
            ..StoreConfig::default()
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.name(), "opensearch");
    }
}
