//! Transactional document store interface.
//!
//! Documents are JSON objects addressed by `(collection, id)`. Every stored
//! document carries a version counter; a [`Transaction`] records the version of
//! each document it reads and its commit fails with [`StoreError::Conflict`]
//! when any of them moved in the meantime. [`run_transaction`] retries the whole
//! body on conflict, which is what serializes concurrent slot claims.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};

pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

pub mod collections {
    pub const PARKING_LOTS: &str = "parkingLots";
    pub const RESERVATIONS: &str = "reservations";
    pub const PAYMENT_INTENTS: &str = "paymentIntents";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const USERS: &str = "users";
    pub const NOTICES: &str = "notices";
    pub const REVIEWS: &str = "reviews";
    pub const BILLS: &str = "bills";
}

/// Field equality filter. An empty filter matches every document.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    fields: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }

    /// JSON object usable for containment checks (`data @> filter`)
    pub fn as_object(&self) -> Value {
        let map: Map<String, Value> = self.fields.iter().cloned().collect();
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

/// Emitted after a write becomes visible
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
    pub data: Option<Value>,
}

/// Shallow merge of the top-level keys of `patch` into `target`
pub fn merge_patch(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                target.insert(key, value);
            }
        }
        (target, patch) => *target = patch,
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()>;

    /// Merge `patch` into an existing document; `NotFound` if it is missing
    async fn update(&self, collection: &str, id: &str, patch: Value) -> StoreResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    async fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>>;

    fn begin(&self) -> Box<dyn Transaction>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Optimistic transaction. Reads go to the store, writes are buffered until commit.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    fn set(&mut self, collection: &str, id: &str, data: Value);

    fn update(&mut self, collection: &str, id: &str, patch: Value);

    fn delete(&mut self, collection: &str, id: &str);

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

impl<'s> dyn DocumentStore + 's {
    pub async fn read<T: DeserializeOwned>(&self, collection: &str, id: &str) -> StoreResult<Option<T>> {
        match self.get(collection, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn write<T: Serialize + Sync>(&self, collection: &str, id: &str, value: &T) -> StoreResult<()> {
        self.set(collection, id, serde_json::to_value(value)?).await
    }

    pub async fn list<T: DeserializeOwned>(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<T>> {
        self.query(collection, filter)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
            .collect()
    }
}

impl<'a> dyn Transaction + 'a {
    pub async fn read<T: DeserializeOwned>(&mut self, collection: &str, id: &str) -> StoreResult<Option<T>> {
        match self.get(collection, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub fn write<T: Serialize>(&mut self, collection: &str, id: &str, value: &T) -> StoreResult<()> {
        self.set(collection, id, serde_json::to_value(value)?);
        Ok(())
    }
}

/// Run `body` inside a fresh transaction, retrying the whole body on commit
/// conflicts up to [`MAX_TRANSACTION_ATTEMPTS`] times.
///
/// An error returned by `body` aborts the transaction: nothing it buffered is applied.
pub async fn run_transaction<T, E, F>(store: &dyn DocumentStore, mut body: F) -> Result<T, E>
where
    F: for<'t> FnMut(&'t mut dyn Transaction) -> BoxFuture<'t, Result<T, E>>,
    E: From<StoreError>,
{
    let mut last_conflict = String::new();

    for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
        let mut tx = store.begin();
        let value = body(tx.as_mut()).await?;

        match tx.commit().await {
            Ok(()) => return Ok(value),
            Err(StoreError::Conflict(reason)) => {
                tracing::debug!(attempt, %reason, "Transaction conflict, retrying");
                last_conflict = reason;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StoreError::Conflict(format!(
        "gave up after {} attempts: {}",
        MAX_TRANSACTION_ATTEMPTS, last_conflict
    ))
    .into())
}

/// A write staged by a transaction
#[derive(Debug, Clone)]
pub enum PendingWrite {
    Set(Value),
    Update(Value),
    Delete,
}

/// Read versions and staged writes of one transaction, shared by the store backends.
#[derive(Debug, Default)]
pub struct TxBuffer {
    reads: HashMap<(String, String), u64>,
    writes: Vec<((String, String), PendingWrite)>,
}

impl TxBuffer {
    pub fn record_read(&mut self, collection: &str, id: &str, version: u64) {
        self.reads
            .entry((collection.to_string(), id.to_string()))
            .or_insert(version);
    }

    pub fn stage(&mut self, collection: &str, id: &str, write: PendingWrite) {
        self.writes.push(((collection.to_string(), id.to_string()), write));
    }

    /// Apply this transaction's own staged writes on top of `base`
    pub fn overlay(&self, collection: &str, id: &str, base: Option<Value>) -> Option<Value> {
        let mut current = base;
        for ((c, i), write) in &self.writes {
            if c != collection || i != id {
                continue;
            }
            current = match write {
                PendingWrite::Set(data) => Some(data.clone()),
                PendingWrite::Update(patch) => current.map(|mut doc| {
                    merge_patch(&mut doc, patch.clone());
                    doc
                }),
                PendingWrite::Delete => None,
            };
        }
        current
    }

    pub fn reads(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.reads
            .iter()
            .map(|((collection, id), version)| (collection.as_str(), id.as_str(), *version))
    }

    pub fn into_writes(self) -> Vec<((String, String), PendingWrite)> {
        self.writes
    }
}
