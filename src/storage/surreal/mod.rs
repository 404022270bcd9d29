// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Embedded SurrealDB client and schema shared by both repositories.

pub mod metrics;
pub mod operational;
pub mod schema;

pub use metrics::SurrealMetricsRepository;
pub use operational::SurrealOperationalRepository;

use super::StorageError;
use serde_json::Value;
use surrealdb::{
    engine::local::{Db, RocksDb},
    Surreal,
};
use tracing::{debug, error, info, instrument};

/// Thin wrapper over the embedded SurrealDB connection.
///
/// Queries deserialize through JSON values so chrono/serde_json types on our
/// side never fight the SDK's native enums.
pub struct SurrealClient {
    db: Surreal<Db>,
}

impl SurrealClient {
    /// Opens (or creates) an embedded database at `path`.
    #[instrument(name = "surreal_open", skip_all, fields(db_path = %path))]
    pub async fn open(path: &str, namespace: &str, database: &str) -> Result<Self, StorageError> {
        info!("Opening embedded SurrealDB");
        let db = Surreal::new::<RocksDb>(path).await.map_err(|e| {
            error!(error = %e, "Failed to open SurrealDB");
            StorageError::from(e)
        })?;
        db.use_ns(namespace).use_db(database).await.map_err(|e| {
            error!(error = %e, "Failed to select namespace/database");
            StorageError::from(e)
        })?;
        Ok(Self { db })
    }

    /// Runs DDL or writes without reading a result back.
    #[instrument(name = "surreal_execute", skip(self, bindings), fields(query_len = query.len()))]
    pub async fn execute(
        &self,
        query: &str,
        bindings: Vec<(&'static str, Value)>,
    ) -> Result<(), StorageError> {
        let mut q = self.db.query(query);
        for (name, value) in bindings {
            q = q.bind((name, value));
        }
        q.await.map_err(|e| {
            error!(error = %e, "Query execution failed");
            StorageError::from(e)
        })?;
        Ok(())
    }

    /// Runs a query and deserializes the first statement's result set.
    #[instrument(name = "surreal_query", skip(self, bindings), fields(query_len = query.len()))]
    pub async fn query<T>(
        &self,
        query: &str,
        bindings: Vec<(&'static str, Value)>,
    ) -> Result<Vec<T>, StorageError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut q = self.db.query(query);
        for (name, value) in bindings {
            q = q.bind((name, value));
        }
        let mut response = q.await.map_err(|e| {
            error!(error = %e, "Query execution failed");
            StorageError::from(e)
        })?;

        let rows: Vec<Value> = response.take(0).map_err(|e| {
            error!(error = %e, "Failed to extract query results");
            StorageError::from(e)
        })?;
        debug!(result_count = rows.len(), "Query completed");

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    StorageError::Deserialization(format!("row did not match expected shape: {e}"))
                })
            })
            .collect()
    }

    /// Batch-inserts JSON rows into a table, coercing the `timestamp` field
    /// into a native datetime. Rows are sanitized first (SurrealDB's string
    /// type rejects NUL characters).
    pub async fn insert_rows(&self, table: &str, rows: Vec<Value>) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        let rows: Vec<Value> = rows.into_iter().map(sanitize).collect();
        let query = format!(
            "INSERT INTO {table} (SELECT *, type::datetime(timestamp) AS timestamp FROM $rows)"
        );
        self.execute(&query, vec![("rows", Value::Array(rows))])
            .await
    }
}

/// Removes NUL characters from every string in a JSON tree.
pub(crate) fn sanitize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace('\0', "")),
        Value::Array(arr) => Value::Array(arr.into_iter().map(sanitize).collect()),
        Value::Object(obj) => {
            Value::Object(obj.into_iter().map(|(k, v)| (k, sanitize(v))).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_strips_nul() {
        let dirty = json!({"text": "hello\0world", "nested": {"inner": ["a\0b", 3]}});
        let clean = sanitize(dirty);
        assert_eq!(clean["text"], "helloworld");
        assert_eq!(clean["nested"]["inner"][0], "ab");
        assert_eq!(clean["nested"]["inner"][1], 3);
    }

    #[tokio::test]
    async fn test_open_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let client = SurrealClient::open(dir.path().join("db").to_str().unwrap(), "argus", "test")
            .await
            .unwrap();

        client
            .execute(
                "CREATE note:one CONTENT { body: $body }",
                vec![("body", json!("hello"))],
            )
            .await
            .unwrap();

        #[derive(serde::Deserialize)]
        struct Note {
            body: String,
        }
        let notes: Vec<Note> = client
            .query("SELECT body FROM note", vec![])
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].body, "hello");
    }

    #[tokio::test]
    async fn test_insert_rows_coerces_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let client = SurrealClient::open(dir.path().join("db").to_str().unwrap(), "argus", "test")
            .await
            .unwrap();

        client
            .insert_rows(
                "sample",
                vec![json!({
                    "metric_name": "cpu_percent",
                    "value": 12.0,
                    "timestamp": "2025-06-01T00:00:00Z"
                })],
            )
            .await
            .unwrap();

        #[derive(serde::Deserialize)]
        struct Row {
            value: f64,
        }
        let rows: Vec<Row> = client
            .query(
                "SELECT value FROM sample WHERE timestamp >= type::datetime($since)",
                vec![("since", json!("2025-01-01T00:00:00Z"))],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 12.0);
    }
}
