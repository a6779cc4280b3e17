//! Entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::now_millis;

/// A device-local identifier for an entry, using UUID v7 (time-sortable)
///
/// Generated once at creation and never changed, so it doubles as the
/// idempotency key sent with every remote `add`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Remote-assigned identifier correlating a local entry to its remote record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncId(String);

impl SyncId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SyncId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SyncId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The user-visible fields of an entry
///
/// This is exactly the set compared during reconciliation: two sides are in
/// conflict when their `EntryContent` values differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryContent {
    pub title: String,
    pub description: String,
    /// Display color as stored by the UI (e.g. `#ffcc00`)
    pub color: String,
    /// Reference to an attached image, if any
    pub image_url: Option<String>,
    pub created: DateTime<Utc>,
    pub edited: DateTime<Utc>,
    pub viewed: DateTime<Utc>,
}

impl EntryContent {
    /// Create content with the given title, stamping all timestamps with now
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            title: title.into(),
            description: String::new(),
            color: String::new(),
            image_url: None,
            created: now,
            edited: now,
            viewed: now,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    #[must_use]
    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

/// A note entry in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Device-local identifier
    pub id: EntryId,
    /// Remote identifier; `None` until the entry has been pushed
    pub sync_id: Option<SyncId>,
    /// User-visible fields
    pub content: EntryContent,
}

impl Entry {
    /// Create a new, never-synced entry
    #[must_use]
    pub fn new(content: EntryContent) -> Self {
        Self {
            id: EntryId::new(),
            sync_id: None,
            content,
        }
    }

    /// Create an entry for a record pulled from the remote service
    #[must_use]
    pub fn from_remote(sync_id: SyncId, content: EntryContent) -> Self {
        Self {
            id: EntryId::new(),
            sync_id: Some(sync_id),
            content,
        }
    }

    /// Whether this entry has ever been pushed
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.sync_id.is_some()
    }
}
