//! Entry editing that keeps sync bookkeeping consistent.

use std::sync::Arc;

use crate::db::{EntryFilter, LocalStore};
use crate::error::{Error, Result};
use crate::models::{Entry, EntryContent, EntryId};
use crate::sync::EventBus;
use crate::util::{is_http_url, now_millis};

/// Thread-safe service for creating, editing and deleting entries.
///
/// Deleting a synced entry records a pending deletion so the next pass removes
/// the remote record; edits to synced entries are local only.
pub struct EntryService<S> {
    store: Arc<S>,
    events: Option<EventBus>,
}

impl<S> Clone for EntryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            events: self.events.clone(),
        }
    }
}

impl<S: LocalStore> EntryService<S> {
    pub const fn new(store: Arc<S>) -> Self {
        Self {
            store,
            events: None,
        }
    }

    /// Republish the conflict indicator on `events` after deletions
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Create a new, never-synced entry
    pub async fn create(&self, content: EntryContent) -> Result<Entry> {
        validate(&content)?;
        let entry = Entry::new(content);
        self.store.insert_entry(&entry).await?;
        tracing::debug!("Created entry {}", entry.id);
        Ok(entry)
    }

    /// Replace the user-visible fields, keeping the creation and view times
    pub async fn update(&self, id: &EntryId, mut content: EntryContent) -> Result<Entry> {
        validate(&content)?;
        content.edited = now_millis();
        if !self.store.edit_content(id, &content).await? {
            return Err(not_found(id));
        }
        self.require(id).await
    }

    /// Stamp the entry as viewed now
    pub async fn mark_viewed(&self, id: &EntryId) -> Result<Entry> {
        if !self.store.mark_viewed(id, now_millis()).await? {
            return Err(not_found(id));
        }
        self.require(id).await
    }

    pub async fn get(&self, id: &EntryId) -> Result<Option<Entry>> {
        self.store.get_entry(id).await
    }

    pub async fn list(&self) -> Result<Vec<Entry>> {
        self.store.list_entries(EntryFilter::All).await
    }

    /// Delete an entry, scheduling remote deletion when it was synced
    pub async fn delete(&self, id: &EntryId) -> Result<Entry> {
        let entry = self
            .store
            .discard_entry(id)
            .await?
            .ok_or_else(|| not_found(id))?;

        if let Some(sync_id) = &entry.sync_id {
            tracing::debug!("Deleted entry {}; remote record {} pending deletion", id, sync_id);
            if let Some(events) = &self.events {
                match self.store.list_conflicts().await {
                    Ok(conflicts) => events.set_conflicts_exist(!conflicts.is_empty()),
                    Err(e) => tracing::warn!("Failed to refresh conflict indicator: {}", e),
                }
            }
        } else {
            tracing::debug!("Deleted unsynced entry {}", id);
        }
        Ok(entry)
    }

    async fn require(&self, id: &EntryId) -> Result<Entry> {
        self.store
            .get_entry(id)
            .await?
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: &EntryId) -> Error {
    Error::NotFound(format!("entry {id}"))
}

fn validate(content: &EntryContent) -> Result<()> {
    match content.image_url.as_deref() {
        Some(url) if !is_http_url(url) => Err(Error::InvalidInput(format!(
            "image URL must use http:// or https://: {url}"
        ))),
        _ => Ok(()),
    }
}
