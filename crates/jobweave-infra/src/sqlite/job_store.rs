//! SQLite job store implementation.
//!
//! Implements `JobStore` from `jobweave-core` using sqlx with split read/write
//! pools. Each completed job version is one row; the full `JobDocument` is
//! stored as JSON text next to the columns used for lookups.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use jobweave_core::store::JobStore;
use jobweave_types::document::{DocumentFilter, JobDocument};
use jobweave_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `JobStore`.
pub struct SqliteJobStore {
    pool: DatabasePool,
}

impl SqliteJobStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Rows matching the uuid/index part of `filter`, decoded and checked
    /// against the remaining field conditions.
    async fn select(
        &self,
        filter: &DocumentFilter,
        order_by: &str,
    ) -> Result<Vec<JobDocument>, RepositoryError> {
        let mut sql = String::from("SELECT document FROM job_outputs WHERE 1 = 1");
        if filter.uuid.is_some() {
            sql.push_str(" AND uuid = ?");
        }
        if filter.index.is_some() {
            sql.push_str(" AND job_index = ?");
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);

        let mut query = sqlx::query(&sql);
        if let Some(uuid) = filter.uuid {
            query = query.bind(uuid.to_string());
        }
        if let Some(index) = filter.index {
            query = query.bind(i64::from(index));
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let document: String = row
                .try_get("document")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let doc: JobDocument = serde_json::from_str(&document)
                .map_err(|e| RepositoryError::Query(format!("invalid job document: {e}")))?;
            if filter.matches(&doc) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// JobStore implementation
// ---------------------------------------------------------------------------

impl JobStore for SqliteJobStore {
    async fn put(&self, doc: &JobDocument) -> Result<(), RepositoryError> {
        let document = serde_json::to_string(doc)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize document: {e}")))?;

        let result = sqlx::query(
            r#"INSERT INTO job_outputs (uuid, job_index, name, document, completed_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(doc.uuid.to_string())
        .bind(i64::from(doc.index))
        .bind(&doc.name)
        .bind(&document)
        .bind(format_datetime(&doc.completed_at))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("job {} already stored", doc.key())),
            ),
            Err(e) => Err(RepositoryError::Query(e.to_string())),
        }
    }

    async fn get_one(&self, filter: &DocumentFilter) -> Result<Option<JobDocument>, RepositoryError> {
        let docs = self.select(filter, "job_index DESC, completed_at DESC").await?;
        Ok(docs.into_iter().next())
    }

    async fn query(&self, filter: &DocumentFilter) -> Result<Vec<JobDocument>, RepositoryError> {
        self.select(filter, "completed_at ASC, job_index ASC").await
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM job_outputs")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use jobweave_types::job::JobKey;
    use serde_json::json;
    use uuid::Uuid;

    async fn test_store() -> (SqliteJobStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteJobStore::new(pool), dir)
    }

    fn doc(uuid: Uuid, index: u32, output: serde_json::Value) -> JobDocument {
        JobDocument {
            uuid,
            index,
            name: "append_end".to_string(),
            output,
            completed_at: Utc::now(),
            stored_data: Some(json!({"note": index})),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _dir) = test_store().await;
        let uuid = Uuid::now_v7();
        let written = doc(uuid, 1, json!("12345_end"));
        store.put(&written).await.unwrap();

        let got = store
            .get_one(&DocumentFilter::new().uuid(uuid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, written);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_one_prefers_highest_index() {
        let (store, _dir) = test_store().await;
        let uuid = Uuid::now_v7();
        store.put(&doc(uuid, 1, json!(11))).await.unwrap();
        store.put(&doc(uuid, 2, json!("11_end"))).await.unwrap();

        let latest = store
            .get_one(&DocumentFilter::new().uuid(uuid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.index, 2);

        let first = store
            .get_one(&DocumentFilter::for_key(JobKey::new(uuid, 1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.output, json!(11));
    }

    #[tokio::test]
    async fn test_put_duplicate_is_conflict() {
        let (store, _dir) = test_store().await;
        let written = doc(Uuid::now_v7(), 1, json!("x"));
        store.put(&written).await.unwrap();

        let err = store.put(&written).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_field_filters_and_missing() {
        let (store, _dir) = test_store().await;
        let uuid = Uuid::now_v7();
        store.put(&doc(uuid, 1, json!("a"))).await.unwrap();
        store.put(&doc(Uuid::now_v7(), 1, json!("b"))).await.unwrap();

        let found = store
            .query(&DocumentFilter::new().field("output", json!("a")))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uuid, uuid);

        let none = store
            .get_one(&DocumentFilter::new().uuid(Uuid::now_v7()))
            .await
            .unwrap();
        assert!(none.is_none());

        let all = store.query(&DocumentFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].completed_at <= all[1].completed_at);
    }
}
