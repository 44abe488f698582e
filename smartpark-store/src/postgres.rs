use async_trait::async_trait;
use serde_json::Value;
use smartpark_core::store::{merge_patch, PendingWrite, TxBuffer};
use smartpark_core::{ChangeEvent, ChangeKind, DocumentStore, Filter, StoreError, StoreResult, Transaction};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

const CHANGE_BUFFER: usize = 256;

const UPSERT: &str = r#"
    INSERT INTO documents (collection, id, version, data, updated_at)
    VALUES ($1, $2, nextval('document_versions'), $3, NOW())
    ON CONFLICT (collection, id)
    DO UPDATE SET version = EXCLUDED.version, data = EXCLUDED.data, updated_at = NOW()
"#;

fn backend(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        // serialization_failure, deadlock_detected, unique_violation
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01") | Some("23505")) {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

/// Document store over a single JSONB table
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: Pool<Postgres>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgDocumentStore {
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Ok(Self { pool, changes })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    fn publish(&self, collection: &str, id: &str, data: Option<Value>) {
        let kind = if data.is_some() { ChangeKind::Upserted } else { ChangeKind::Deleted };
        let _ = self.changes.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
            data,
        });
    }

    async fn fetch(&self, collection: &str, id: &str) -> StoreResult<Option<(u64, Value)>> {
        let row = sqlx::query("SELECT version, data FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => {
                let version: i64 = row.try_get("version").map_err(backend)?;
                let data: Value = row.try_get("data").map_err(backend)?;
                Ok(Some((version as u64, data)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self.fetch(collection, id).await?.map(|(_, data)| data))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()> {
        sqlx::query(UPSERT)
            .bind(collection)
            .bind(id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        self.publish(collection, id, Some(data));
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query("SELECT data FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        let mut doc: Value = row.try_get("data").map_err(backend)?;
        merge_patch(&mut doc, patch);

        sqlx::query(UPSERT)
            .bind(collection)
            .bind(id)
            .bind(&doc)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        self.publish(collection, id, Some(doc));
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() > 0 {
            self.publish(collection, id, None);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>> {
        let rows = sqlx::query("SELECT data FROM documents WHERE collection = $1 AND data @> $2")
            .bind(collection)
            .bind(filter.as_object())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| row.try_get::<Value, _>("data").map_err(backend))
            .collect()
    }

    fn begin(&self) -> Box<dyn Transaction> {
        Box::new(PgTransaction {
            store: self.clone(),
            buffer: TxBuffer::default(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

struct PgTransaction {
    store: PgDocumentStore,
    buffer: TxBuffer,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let current = self.store.fetch(collection, id).await?;
        let version = current.as_ref().map(|(v, _)| *v).unwrap_or(0);
        self.buffer.record_read(collection, id, version);
        Ok(self.buffer.overlay(collection, id, current.map(|(_, data)| data)))
    }

    fn set(&mut self, collection: &str, id: &str, data: Value) {
        self.buffer.stage(collection, id, PendingWrite::Set(data));
    }

    fn update(&mut self, collection: &str, id: &str, patch: Value) {
        self.buffer.stage(collection, id, PendingWrite::Update(patch));
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.buffer.stage(collection, id, PendingWrite::Delete);
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgTransaction { store, buffer } = *self;
        let mut tx = store.pool.begin().await.map_err(backend)?;

        for (collection, id, read_version) in buffer.reads() {
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
            )
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

            if current.unwrap_or(0) as u64 != read_version {
                return Err(StoreError::Conflict(format!("{}/{} changed", collection, id)));
            }
        }

        let mut applied: Vec<(String, String, Option<Value>)> = Vec::new();
        for ((collection, id), write) in buffer.into_writes() {
            match write {
                PendingWrite::Set(data) => {
                    sqlx::query(UPSERT)
                        .bind(&collection)
                        .bind(&id)
                        .bind(&data)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                    applied.push((collection, id, Some(data)));
                }
                PendingWrite::Update(patch) => {
                    let existing: Option<Value> = sqlx::query_scalar(
                        "SELECT data FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend)?;

                    let mut doc = existing.ok_or_else(|| StoreError::not_found(&collection, &id))?;
                    merge_patch(&mut doc, patch);
                    sqlx::query(UPSERT)
                        .bind(&collection)
                        .bind(&id)
                        .bind(&doc)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                    applied.push((collection, id, Some(doc)));
                }
                PendingWrite::Delete => {
                    sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                        .bind(&collection)
                        .bind(&id)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                    applied.push((collection, id, None));
                }
            }
        }

        // Dropping `tx` on any early return above rolls everything back
        tx.commit().await.map_err(backend)?;

        for (collection, id, doc) in applied {
            store.publish(&collection, &id, doc);
        }
        Ok(())
    }
}
