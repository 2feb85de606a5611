//! libSQL backend — async `DocumentStore` implementation.
//!
//! Documents are stored as JSON text keyed by `(collection, id)`. Supports
//! local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{DocumentStore, MergeUpdate, apply_merge, violated_precondition};

/// libSQL document store.
///
/// Stores a single connection that is reused for all operations. Merge-updates
/// are read-modify-write, so they are serialized by `write_lock`; the final
/// write is one `UPDATE` of the whole body, which readers see atomically.
pub struct LibSqlDocumentStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlDocumentStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Document store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn read_body(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_document: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let body: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get_document: {e}")))?;
                serde_json::from_str(&body)
                    .map(Some)
                    .map_err(|e| StoreError::Serialization(format!("{collection}/{id}: {e}")))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_document: {e}"))),
        }
    }
}

#[async_trait]
impl DocumentStore for LibSqlDocumentStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        self.read_body(collection, id).await
    }

    async fn create_document(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<(), StoreError> {
        let body_str =
            serde_json::to_string(body).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        let _guard = self.write_lock.lock().await;
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO documents (collection, id, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![collection, id, body_str, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_document: {e}")))?;

        if inserted == 0 {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        debug!(collection, id, "Document created");
        Ok(())
    }

    async fn merge_update(
        &self,
        collection: &str,
        id: &str,
        update: &MergeUpdate,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut body = self
            .read_body(collection, id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        if let Some(field) = violated_precondition(&body, update) {
            return Err(StoreError::PreconditionFailed {
                collection: collection.to_string(),
                id: id.to_string(),
                field: field.to_string(),
            });
        }

        apply_merge(&mut body, update);
        let body_str =
            serde_json::to_string(&body).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "UPDATE documents SET body = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4",
                params![body_str, Utc::now().to_rfc3339(), collection, id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("merge_update: {e}")))?;

        debug!(
            collection,
            id,
            fields = update.fields().len(),
            "Document merge-updated"
        );
        Ok(())
    }
}
