//! Sync journal model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::util::now_millis;

/// What a journal record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    /// Phase 1: local entries pushed to the remote
    AddedToServer,
    /// Phase 2: pending deletions confirmed by the remote
    DeletedFromServer,
    /// Phase 3: remote records inserted locally
    AddedToLocal,
    /// Phase 3: entries flagged for manual resolution
    Conflicting,
    /// Phase 3: local entries removed because the remote no longer has them
    DeletedFromLocal,
    /// Sync deferred, no connectivity
    DeferredNoInternet,
    /// Sync deferred, only metered connectivity and wifi-only is set
    DeferredNoWifi,
    /// A whole pass finished
    PassCompleted,
}

impl JournalAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddedToServer => "added_to_server",
            Self::DeletedFromServer => "deleted_from_server",
            Self::AddedToLocal => "added_to_local",
            Self::Conflicting => "conflicting",
            Self::DeletedFromLocal => "deleted_from_local",
            Self::DeferredNoInternet => "deferred_no_internet",
            Self::DeferredNoWifi => "deferred_no_wifi",
            Self::PassCompleted => "pass_completed",
        }
    }
}

impl fmt::Display for JournalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added_to_server" => Ok(Self::AddedToServer),
            "deleted_from_server" => Ok(Self::DeletedFromServer),
            "added_to_local" => Ok(Self::AddedToLocal),
            "conflicting" => Ok(Self::Conflicting),
            "deleted_from_local" => Ok(Self::DeletedFromLocal),
            "deferred_no_internet" => Ok(Self::DeferredNoInternet),
            "deferred_no_wifi" => Ok(Self::DeferredNoWifi),
            "pass_completed" => Ok(Self::PassCompleted),
            other => Err(format!("unknown journal action: {other}")),
        }
    }
}

/// Outcome of the journaled step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    Ok,
    Error,
}

impl JournalStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    /// `Error` when any item failed, `Ok` otherwise
    pub const fn from_failures(failed: u32) -> Self {
        if failed == 0 {
            Self::Ok
        } else {
            Self::Error
        }
    }
}

impl FromStr for JournalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown journal status: {other}")),
        }
    }
}

/// Immutable record of one sync step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub recorded_at: DateTime<Utc>,
    pub action: JournalAction,
    pub status: JournalStatus,
    pub affected: u32,
}

impl JournalRecord {
    #[must_use]
    pub fn new(action: JournalAction, status: JournalStatus, affected: u32) -> Self {
        Self {
            recorded_at: now_millis(),
            action,
            status,
            affected,
        }
    }
}
