//! Configuration for the sync coordinator.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::remote::HttpRemoteClient;
use crate::util::normalize_text_option;

const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Static configuration of one user's sync coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// User whose remote collection and settings are synced
    pub user_id: String,
    /// Base URL of the remote notes service
    pub remote_url: Option<String>,
    /// Upper bound for every single remote call
    pub remote_timeout: Duration,
    /// Buffer size of the event channel; slow subscribers skip older events
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Create a configuration for the given user
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            remote_url: None,
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Set the remote service base URL
    #[must_use]
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    /// Set the per-call remote timeout
    #[must_use]
    pub const fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Set the event channel capacity
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Load configuration from `NOTESYNC_*` environment variables
    pub fn from_env() -> Result<Self> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let user_id = normalize_text_option(lookup("NOTESYNC_USER_ID"))
            .ok_or_else(|| Error::Config("NOTESYNC_USER_ID must be set".to_string()))?;

        let mut config = Self::new(user_id);
        config.remote_url = normalize_text_option(lookup("NOTESYNC_REMOTE_URL"));

        if let Some(raw) = normalize_text_option(lookup("NOTESYNC_REMOTE_TIMEOUT_SECS")) {
            let secs: u64 = raw.parse().map_err(|_| {
                Error::Config(format!("NOTESYNC_REMOTE_TIMEOUT_SECS is not a number: {raw}"))
            })?;
            if secs == 0 {
                return Err(Error::Config(
                    "NOTESYNC_REMOTE_TIMEOUT_SECS must be greater than zero".to_string(),
                ));
            }
            config.remote_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = normalize_text_option(lookup("NOTESYNC_EVENT_CAPACITY")) {
            config.event_capacity = raw.parse().map_err(|_| {
                Error::Config(format!("NOTESYNC_EVENT_CAPACITY is not a number: {raw}"))
            })?;
        }

        Ok(config)
    }

    /// Build the HTTP remote client described by this configuration
    pub fn http_client(&self) -> Result<HttpRemoteClient> {
        let url = self
            .remote_url
            .as_deref()
            .ok_or_else(|| Error::Config("remote URL is not configured".to_string()))?;
        Ok(HttpRemoteClient::new(url, self.remote_timeout)?)
    }
}
