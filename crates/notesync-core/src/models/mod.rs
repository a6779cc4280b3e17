//! Data models for notesync

mod entry;
mod journal;
mod settings;

pub use entry::{Entry, EntryContent, EntryId, SyncId};
pub use journal::{JournalAction, JournalRecord, JournalStatus};
pub use settings::{SyncSettings, DEFAULT_PROGRESS_NOTIFICATION_DELAY_MS};
