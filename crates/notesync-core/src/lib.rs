//! notesync-core - Offline-first note synchronization engine
//!
//! This crate contains the entry models, the local libSQL store, the remote
//! service client, and the sync coordinator that reconciles the two while
//! deferring work the network policy does not allow.

pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Entry, EntryContent, EntryId, SyncId};
pub use state::SyncRunState;
pub use sync::{SyncConfig, SyncCoordinator};
