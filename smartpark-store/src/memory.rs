use async_trait::async_trait;
use serde_json::Value;
use smartpark_core::store::{merge_patch, PendingWrite, TxBuffer};
use smartpark_core::{ChangeEvent, ChangeKind, DocumentStore, Filter, StoreError, StoreResult, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const CHANGE_BUFFER: usize = 256;

#[derive(Debug, Clone)]
struct Stored {
    version: u64,
    data: Value,
}

#[derive(Debug, Default)]
struct State {
    docs: HashMap<String, HashMap<String, Stored>>,
    /// Monotonic, so a deleted and re-created document never reuses a version
    clock: u64,
}

impl State {
    fn version_of(&self, collection: &str, id: &str) -> u64 {
        self.docs
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|s| s.version)
            .unwrap_or(0)
    }

    fn data_of(&self, collection: &str, id: &str) -> Option<Value> {
        self.docs
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|s| s.data.clone())
    }

    fn put(&mut self, collection: &str, id: &str, data: Value) {
        self.clock += 1;
        let version = self.clock;
        self.docs
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), Stored { version, data });
    }

    fn remove(&mut self, collection: &str, id: &str) -> bool {
        self.clock += 1;
        self.docs
            .get_mut(collection)
            .map(|c| c.remove(id).is_some())
            .unwrap_or(false)
    }
}

/// In-process document store with optimistic transactions.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            changes,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, collection: &str, id: &str, data: Option<Value>) {
        let kind = if data.is_some() { ChangeKind::Upserted } else { ChangeKind::Deleted };
        // No subscribers is fine
        let _ = self.changes.send(ChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind,
            data,
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self.state.read().await.data_of(collection, id))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> StoreResult<()> {
        self.state.write().await.put(collection, id, data.clone());
        self.publish(collection, id, Some(data));
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> StoreResult<()> {
        let merged = {
            let mut state = self.state.write().await;
            let mut doc = state
                .data_of(collection, id)
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            merge_patch(&mut doc, patch);
            state.put(collection, id, doc.clone());
            doc
        };
        self.publish(collection, id, Some(merged));
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let removed = self.state.write().await.remove(collection, id);
        if removed {
            self.publish(collection, id, None);
        }
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>> {
        let state = self.state.read().await;
        Ok(state
            .docs
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|s| filter.matches(&s.data))
                    .map(|s| s.data.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn begin(&self) -> Box<dyn Transaction> {
        Box::new(MemoryTransaction {
            store: self.clone(),
            buffer: TxBuffer::default(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    buffer: TxBuffer,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let (version, data) = {
            let state = self.store.state.read().await;
            (state.version_of(collection, id), state.data_of(collection, id))
        };
        self.buffer.record_read(collection, id, version);
        Ok(self.buffer.overlay(collection, id, data))
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
        let MemoryTransaction { store, buffer } = *self;
        let mut state = store.state.write().await;

        for (collection, id, read_version) in buffer.reads() {
            if state.version_of(collection, id) != read_version {
                return Err(StoreError::Conflict(format!("{}/{} changed", collection, id)));
            }
        }

        // Resolve every write before touching the state so a failure applies nothing
        let mut resolved: Vec<((String, String), Option<Value>)> = Vec::new();
        for ((collection, id), write) in buffer.into_writes() {
            let current = resolved
                .iter()
                .rev()
                .find(|((c, i), _)| *c == collection && *i == id)
                .map(|(_, doc)| doc.clone())
                .unwrap_or_else(|| state.data_of(&collection, &id));

            let next = match write {
                PendingWrite::Set(data) => Some(data),
                PendingWrite::Update(patch) => {
                    let mut doc = current.ok_or_else(|| StoreError::not_found(&collection, &id))?;
                    merge_patch(&mut doc, patch);
                    Some(doc)
                }
                PendingWrite::Delete => None,
            };
            resolved.push(((collection, id), next));
        }

        for ((collection, id), doc) in &resolved {
            match doc {
                Some(data) => state.put(collection, id, data.clone()),
                None => {
                    state.remove(collection, id);
                }
            }
        }
        drop(state);

        for ((collection, id), doc) in resolved {
            store.publish(&collection, &id, doc);
        }
        Ok(())
    }
}
