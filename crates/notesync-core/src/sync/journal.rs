//! Append-only history of sync steps.

use std::sync::Arc;

use crate::db::LocalStore;
use crate::error::Result;
use crate::models::{JournalAction, JournalRecord, JournalStatus};

/// Writes and reads journal records through the local store.
///
/// Recording never fails the caller: a record that cannot be written is
/// logged and dropped.
pub struct Journal<S> {
    store: Arc<S>,
}

impl<S> Clone for Journal<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LocalStore> Journal<S> {
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn record(&self, action: JournalAction, status: JournalStatus, affected: u32) {
        let record = JournalRecord::new(action, status, affected);
        tracing::debug!(
            "Journal: {} {} ({})",
            action.as_str(),
            status.as_str(),
            affected
        );
        if let Err(e) = self.store.append_journal(&record).await {
            tracing::warn!("Failed to write journal record {}: {}", action.as_str(), e);
        }
    }

    /// Most recent records first
    pub async fn history(&self, limit: usize) -> Result<Vec<JournalRecord>> {
        self.store.list_journal(limit).await
    }

    /// Remove every record, returning how many were removed
    pub async fn clear(&self) -> Result<u64> {
        self.store.clear_journal().await
    }
}
