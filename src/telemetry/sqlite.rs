use crate::telemetry::sample::Sample;
use crate::telemetry::schema;
use crate::telemetry::store::{StoreError, TimeSeriesStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::Arc;

/// Time-series store backed by a single SQLite connection.
///
/// Every call runs on the blocking pool; the connection is shared behind a
/// mutex so the generator and query service can hold the same handle.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    series: String,
}

impl SqliteStore {
    /// Open (or create) the database file at `db_path`.
    pub fn open(db_path: &Path, series: &str) -> Result<Self> {
        schema::validate_series_name(series).map_err(anyhow::Error::msg)?;
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating telemetry dir: {}", dir.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("opening telemetry db: {}", db_path.display()))?;
        conn.execute_batch(schema::PRAGMAS)
            .context("telemetry PRAGMA setup")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            series: series.to_string(),
        })
    }

    /// Private in-memory database, gone when the store is dropped.
    pub fn open_in_memory(series: &str) -> Result<Self> {
        schema::validate_series_name(series).map_err(anyhow::Error::msg)?;
        let conn = Connection::open_in_memory().context("opening in-memory telemetry db")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            series: series.to_string(),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let series = self.series.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            op(&conn, &series)
        })
        .await
        .map_err(|e| StoreError::StoreUnavailable(format!("sqlite worker failed: {e}")))?
    }
}

fn map_sqlite_err(series: &str, err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
            StoreError::MalformedResponse(format!("series `{series}`: {err}"))
        }
        rusqlite::Error::SqliteFailure(_, Some(ref msg)) if msg.contains("no such table") => {
            StoreError::StoreUnavailable(format!("series `{series}` does not exist"))
        }
        other => StoreError::StoreUnavailable(format!("series `{series}`: {other}")),
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn select_samples(
    conn: &Connection,
    series: &str,
    sql: &str,
    limit: usize,
) -> Result<Vec<Sample>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(|e| map_sqlite_err(series, e))?;
    let rows = stmt
        .query_map(rusqlite::params![sql_limit(limit)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(|e| map_sqlite_err(series, e))?;

    let mut results = Vec::new();
    for row in rows {
        let (name, timestamp, cpu_usage, anomaly) = row.map_err(|e| map_sqlite_err(series, e))?;
        let sample = Sample::from_stored(name, timestamp, cpu_usage, anomaly)
            .map_err(StoreError::MalformedResponse)?;
        results.push(sample);
    }
    Ok(results)
}

#[async_trait]
impl TimeSeriesStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn series(&self) -> &str {
        &self.series
    }

    async fn reset_series(&self) -> Result<(), StoreError> {
        self.with_conn(|conn, series| {
            conn.execute_batch(&schema::drop_series_sql(series))
                .map_err(|e| map_sqlite_err(series, e))?;
            conn.execute_batch(&schema::create_series_sql(series))
                .map_err(|e| match e.sqlite_error_code() {
                    Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                        map_sqlite_err(series, e)
                    }
                    _ => StoreError::SchemaConflict(format!("creating `{series}`: {e}")),
                })
        })
        .await
    }

    async fn upsert(&self, sample: &Sample) -> Result<(), StoreError> {
        let sample = sample.clone();
        self.with_conn(move |conn, series| {
            let sql = format!(
                "INSERT INTO {} (timestamp, name, cpu_usage, anomaly) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(timestamp) DO UPDATE SET
                    name = excluded.name,
                    cpu_usage = excluded.cpu_usage,
                    anomaly = excluded.anomaly",
                schema::table_ident(series)
            );
            conn.execute(
                &sql,
                rusqlite::params![
                    sample.timestamp,
                    sample.name,
                    sample.cpu_usage,
                    sample.anomaly_flag(),
                ],
            )
            .map_err(|e| map_sqlite_err(series, e))?;
            Ok(())
        })
        .await
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        self.with_conn(move |conn, series| {
            let sql = format!(
                "SELECT name, timestamp, cpu_usage, anomaly FROM {}
                 ORDER BY timestamp DESC
                 LIMIT ?1",
                schema::table_ident(series)
            );
            select_samples(conn, series, &sql, limit)
        })
        .await
    }

    async fn anomalies(&self, limit: usize) -> Result<Vec<Sample>, StoreError> {
        self.with_conn(move |conn, series| {
            let sql = format!(
                "SELECT name, timestamp, cpu_usage, anomaly FROM {}
                 WHERE anomaly = 1
                 ORDER BY timestamp ASC
                 LIMIT ?1",
                schema::table_ident(series)
            );
            select_samples(conn, series, &sql, limit)
        })
        .await
    }

    async fn average_usage(&self, start: i64, end: i64) -> Result<Option<f64>, StoreError> {
        self.with_conn(move |conn, series| {
            let sql = format!(
                "SELECT AVG(cpu_usage) FROM {} WHERE timestamp BETWEEN ?1 AND ?2",
                schema::table_ident(series)
            );
            conn.query_row(&sql, rusqlite::params![start, end], |r| {
                r.get::<_, Option<f64>>(0)
            })
            .map_err(|e| map_sqlite_err(series, e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn fresh_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory("cpu-index").unwrap();
        store.reset_series().await.unwrap();
        store
    }

    #[tokio::test]
    async fn store_open_and_upsert_on_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("telemetry.db");
        let store = SqliteStore::open(&path, "cpu-index").unwrap();
        store.reset_series().await.unwrap();
        store.upsert(&Sample::new(100, 20.5, false)).await.unwrap();
        drop(store);

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM \"cpu-index\"", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn upsert_overwrites_same_second() {
        let store = fresh_store().await;
        store.upsert(&Sample::new(100, 20.0, false)).await.unwrap();
        store.upsert(&Sample::new(100, 81.0, true)).await.unwrap();

        let latest = store.latest(10).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].cpu_usage, 81.0);
        assert!(latest[0].anomaly);
    }

    #[tokio::test]
    async fn latest_is_newest_first_and_limited() {
        let store = fresh_store().await;
        for ts in [10, 30, 20, 40] {
            store.upsert(&Sample::new(ts, 20.0, false)).await.unwrap();
        }
        let latest = store.latest(3).await.unwrap();
        let stamps: Vec<i64> = latest.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![40, 30, 20]);
    }

    #[tokio::test]
    async fn anomalies_filter_on_flag() {
        let store = fresh_store().await;
        for ts in 0..10 {
            store
                .upsert(&Sample::new(ts, 20.0, ts % 3 == 0))
                .await
                .unwrap();
        }
        let anomalies = store.anomalies(100).await.unwrap();
        let stamps: Vec<i64> = anomalies.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![0, 3, 6, 9]);
        assert_eq!(store.anomalies(2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn average_is_inclusive_and_none_when_empty() {
        let store = fresh_store().await;
        store.upsert(&Sample::new(10, 18.0, false)).await.unwrap();
        store.upsert(&Sample::new(20, 22.0, false)).await.unwrap();
        store.upsert(&Sample::new(30, 20.0, false)).await.unwrap();
        store.upsert(&Sample::new(31, 90.0, true)).await.unwrap();

        let avg = store.average_usage(10, 30).await.unwrap().unwrap();
        assert!((avg - 20.0).abs() < 1e-9);
        assert_eq!(store.average_usage(100, 200).await.unwrap(), None);
        assert_eq!(store.average_usage(30, 10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reset_empties_existing_series() {
        let store = fresh_store().await;
        store.upsert(&Sample::new(1, 20.0, false)).await.unwrap();
        store.reset_series().await.unwrap();
        assert!(store.latest(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_series_is_unavailable() {
        let store = SqliteStore::open_in_memory("never-created").unwrap();
        let err = store.latest(1).await.unwrap_err();
        assert!(err.is_unavailable(), "got {err:?}");
    }

    #[tokio::test]
    async fn foreign_rows_are_malformed() {
        let store = fresh_store().await;
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO \"cpu-index\" (timestamp, name, cpu_usage, anomaly) VALUES (5, 'mem_usage', 1.0, 0)",
                [],
            )
            .unwrap();
        let err = store.latest(10).await.unwrap_err();
        assert!(matches!(err, StoreError::MalformedResponse(_)), "got {err:?}");
    }

    #[test]
    fn rejects_unsafe_series_names() {
        assert!(SqliteStore::open_in_memory("bad name").is_err());
    }
}
