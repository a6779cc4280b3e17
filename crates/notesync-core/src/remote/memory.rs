//! In-memory remote service for tests and offline demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::models::{Entry, EntryContent, SyncId};

use super::{RemoteClient, RemoteEntry, RemoteError, RemoteResult};

/// Remote operations, used for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Add,
    Update,
    Delete,
    GetAll,
    Get,
}

#[derive(Default)]
struct Collection {
    records: BTreeMap<SyncId, EntryContent>,
    // client id -> sync id, so a retried add returns the original record
    client_ids: HashMap<String, SyncId>,
}

/// A `RemoteClient` backed by per-user maps.
///
/// Assigns numeric sync IDs, deduplicates `add` calls by client ID, counts
/// every call, and can be told to fail or slow down specific operations.
pub struct MemoryRemote {
    collections: Mutex<HashMap<String, Collection>>,
    next_id: AtomicU64,
    calls: Mutex<HashMap<RemoteOp, usize>>,
    total_calls: AtomicUsize,
    failures: Mutex<HashMap<RemoteOp, usize>>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Start assigning sync IDs from `next`
    #[must_use]
    pub fn with_next_id(self, next: u64) -> Self {
        self.next_id.store(next, Ordering::SeqCst);
        self
    }

    /// Seed a record directly, bypassing call counting
    pub fn insert(&self, user_id: &str, sync_id: impl Into<SyncId>, content: EntryContent) {
        lock(&self.collections)
            .entry(user_id.to_string())
            .or_default()
            .records
            .insert(sync_id.into(), content);
    }

    /// Remove a record directly, as another device would
    pub fn remove(&self, user_id: &str, sync_id: &SyncId) -> Option<EntryContent> {
        lock(&self.collections)
            .get_mut(user_id)
            .and_then(|collection| collection.records.remove(sync_id))
    }

    /// Snapshot of a user's records
    pub fn records(&self, user_id: &str) -> Vec<RemoteEntry> {
        lock(&self.collections)
            .get(user_id)
            .map(|collection| {
                collection
                    .records
                    .iter()
                    .map(|(sync_id, content)| RemoteEntry::new(sync_id.clone(), content.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up a single record without counting a call
    pub fn record(&self, user_id: &str, sync_id: &SyncId) -> Option<EntryContent> {
        lock(&self.collections)
            .get(user_id)
            .and_then(|collection| collection.records.get(sync_id).cloned())
    }

    /// Number of calls made for one operation
    pub fn calls(&self, op: RemoteOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Number of calls made across all operations
    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` calls of `op` fail with a transport error
    pub fn fail_next(&self, op: RemoteOp, count: usize) {
        *lock(&self.failures).entry(op).or_default() += count;
    }

    /// Make every call fail with a transport error while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    async fn begin(&self, op: RemoteOp) -> RemoteResult<()> {
        *lock(&self.calls).entry(op).or_default() += 1;
        self.total_calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("remote is offline".to_string()));
        }

        let mut failures = lock(&self.failures);
        if let Some(remaining) = failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transport(format!("injected {op:?} failure")));
            }
        }
        Ok(())
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteClient for MemoryRemote {
    async fn add(&self, user_id: &str, entry: &Entry) -> RemoteResult<SyncId> {
        self.begin(RemoteOp::Add).await?;

        let mut collections = lock(&self.collections);
        let collection = collections.entry(user_id.to_string()).or_default();
        let client_id = entry.id.as_str();

        if let Some(existing) = collection.client_ids.get(&client_id) {
            if collection.records.contains_key(existing) {
                return Ok(existing.clone());
            }
        }

        let sync_id = SyncId::new(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        collection
            .records
            .insert(sync_id.clone(), entry.content.clone());
        collection.client_ids.insert(client_id, sync_id.clone());
        Ok(sync_id)
    }

    async fn update(
        &self,
        user_id: &str,
        sync_id: &SyncId,
        content: &EntryContent,
    ) -> RemoteResult<()> {
        self.begin(RemoteOp::Update).await?;

        let mut collections = lock(&self.collections);
        let record = collections
            .get_mut(user_id)
            .and_then(|collection| collection.records.get_mut(sync_id))
            .ok_or_else(|| RemoteError::NotFound(sync_id.clone()))?;
        *record = content.clone();
        Ok(())
    }

    async fn delete(&self, user_id: &str, sync_id: &SyncId) -> RemoteResult<()> {
        self.begin(RemoteOp::Delete).await?;

        lock(&self.collections)
            .get_mut(user_id)
            .and_then(|collection| collection.records.remove(sync_id))
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(sync_id.clone()))
    }

    async fn get_all(&self, user_id: &str) -> RemoteResult<Vec<RemoteEntry>> {
        self.begin(RemoteOp::GetAll).await?;
        Ok(self.records(user_id))
    }

    async fn get(&self, user_id: &str, sync_id: &SyncId) -> RemoteResult<Option<RemoteEntry>> {
        self.begin(RemoteOp::Get).await?;
        Ok(self
            .record(user_id, sync_id)
            .map(|content| RemoteEntry::new(sync_id.clone(), content)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
