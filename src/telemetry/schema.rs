// Series schema for both store backends.

use serde_json::{json, Value};

pub const PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA synchronous  = NORMAL;
PRAGMA temp_store   = MEMORY;
";

/// A series name must be non-empty and made of ASCII letters, digits, `-`
/// and `_`, so it can be used both as an SQLite table and an index name.
pub fn validate_series_name(series: &str) -> Result<(), String> {
    if series.is_empty() {
        return Err("series name is empty".into());
    }
    if let Some(bad) = series
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(format!("series name `{series}` contains invalid character `{bad}`"));
    }
    Ok(())
}

/// Quoted SQLite identifier for a validated series name.
pub fn table_ident(series: &str) -> String {
    format!("\"{series}\"")
}

pub fn drop_series_sql(series: &str) -> String {
    format!("DROP TABLE IF EXISTS {};", table_ident(series))
}

pub fn create_series_sql(series: &str) -> String {
    format!(
        "\
CREATE TABLE {} (
    timestamp   INTEGER PRIMARY KEY,
    name        TEXT    NOT NULL,
    cpu_usage   REAL    NOT NULL,
    anomaly     INTEGER NOT NULL CHECK (anomaly IN (0, 1))
);",
        table_ident(series)
    )
}

/// OpenSearch index body with the explicit field mapping.
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "name": { "type": "text" },
                "timestamp": { "type": "date", "format": "epoch_second" },
                "cpu_usage": { "type": "float" },
                "anomaly": { "type": "integer" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn ddl_executes_on_in_memory_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(PRAGMAS).unwrap();
        conn.execute_batch(&drop_series_sql("cpu-index")).unwrap();
        conn.execute_batch(&create_series_sql("cpu-index")).unwrap();
    }

    #[test]
    fn drop_then_create_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        for _ in 0..2 {
            conn.execute_batch(&drop_series_sql("cpu_index")).unwrap();
            conn.execute_batch(&create_series_sql("cpu_index")).unwrap();
        }
    }

    #[test]
    fn anomaly_column_rejects_other_values() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&create_series_sql("s")).unwrap();
        let err = conn.execute(
            "INSERT INTO \"s\" (timestamp, name, cpu_usage, anomaly) VALUES (1, 'CPU_usage', 20.0, 3)",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn series_names_are_checked() {
        assert!(validate_series_name("cpu-index").is_ok());
        assert!(validate_series_name("host_1").is_ok());
        assert!(validate_series_name("").is_err());
        assert!(validate_series_name("cpu\"; DROP").is_err());
    }

    #[test]
    fn mapping_declares_epoch_second_timestamps() {
        let mapping = index_mapping();
        assert_eq!(
            mapping["mappings"]["properties"]["timestamp"]["format"],
            "epoch_second"
        );
        assert_eq!(mapping["mappings"]["properties"]["anomaly"]["type"], "integer");
    }
}
