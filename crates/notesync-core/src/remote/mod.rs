//! Remote notes service interface
//!
//! The remote side stores one collection of entries per user. Every record is
//! addressed by the remote-assigned [`SyncId`].

mod http;
mod memory;
mod wire;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::models::{Entry, EntryContent, SyncId};

pub use http::HttpRemoteClient;
pub use memory::{MemoryRemote, RemoteOp};
pub use wire::{parse_add_response, parse_entry_list, parse_entry_record, WireEntry};

/// A record as stored by the remote service, stripped of transport-only keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub sync_id: SyncId,
    pub content: EntryContent,
}

impl RemoteEntry {
    pub const fn new(sync_id: SyncId, content: EntryContent) -> Self {
        Self { sync_id, content }
    }
}

/// Errors from a single remote call
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Connection or IO failure
    #[error("Remote transport failed: {0}")]
    Transport(String),
    /// No response within the configured timeout
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),
    /// The service answered with a failure status
    #[error("Remote API error: {message} ({status})")]
    Status { status: u16, message: String },
    /// The response body could not be understood
    #[error("Malformed remote payload: {0}")]
    Malformed(String),
    /// The addressed record does not exist remotely
    #[error("Remote record not found: {0}")]
    NotFound(SyncId),
    /// The client itself is misconfigured
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    /// Connection-level failure (the request may never have reached the service)
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Malformed(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Operations against a per-user remote collection
pub trait RemoteClient: Send + Sync {
    /// Create a remote record and return its new sync ID
    ///
    /// The entry's local ID travels along as an idempotency key so the service
    /// can return the existing record when an earlier `add` already succeeded.
    fn add(&self, user_id: &str, entry: &Entry) -> impl Future<Output = RemoteResult<SyncId>> + Send;

    /// Overwrite the content of an existing remote record
    fn update(
        &self,
        user_id: &str,
        sync_id: &SyncId,
        content: &EntryContent,
    ) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Delete a remote record
    fn delete(&self, user_id: &str, sync_id: &SyncId)
        -> impl Future<Output = RemoteResult<()>> + Send;

    /// Fetch the user's full collection
    fn get_all(&self, user_id: &str) -> impl Future<Output = RemoteResult<Vec<RemoteEntry>>> + Send;

    /// Fetch one record; `None` if it does not exist
    fn get(
        &self,
        user_id: &str,
        sync_id: &SyncId,
    ) -> impl Future<Output = RemoteResult<Option<RemoteEntry>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        assert!(RemoteError::Transport("reset".into()).is_transport());
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(!RemoteError::Malformed("bad".into()).is_transport());
        assert!(!RemoteError::Status {
            status: 500,
            message: "boom".into()
        }
        .is_transport());
    }

    #[test]
    fn status_error_display_includes_code() {
        let error = RemoteError::Status {
            status: 503,
            message: "maintenance".into(),
        };
        assert_eq!(error.to_string(), "Remote API error: maintenance (503)");
    }
}
