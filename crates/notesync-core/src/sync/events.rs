//! Sync events and the conflict indicator.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

/// The step an event reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Unsynced local entries pushed to the remote
    PushNew,
    /// Pending deletions pushed to the remote
    PushDeletions,
    /// Remote collection pulled and reconciled
    PullReconcile,
    /// The pass as a whole
    Pass,
    /// A request deferred by the network gate
    Deferral,
    /// A user-chosen conflict resolution
    Resolution,
}

/// Outcome reported by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    Ok,
    Error,
    /// Deferred until the network allows a pass
    Pending,
    /// The pass is taking longer than the notification delay
    InProgress,
}

/// One notification published to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEvent {
    pub phase: SyncPhase,
    pub status: EventStatus,
    pub affected: u32,
}

impl SyncEvent {
    pub const fn new(phase: SyncPhase, status: EventStatus, affected: u32) -> Self {
        Self {
            phase,
            status,
            affected,
        }
    }

    /// Event for a finished step; `Error` when any item failed
    pub const fn finished(phase: SyncPhase, affected: u32, failed: u32) -> Self {
        let status = if failed == 0 {
            EventStatus::Ok
        } else {
            EventStatus::Error
        };
        Self::new(phase, status, affected)
    }
}

/// Fan-out of sync events plus the "conflicts exist" signal.
///
/// Events are lossy for lagging subscribers; the conflict indicator always
/// holds the latest value.
#[derive(Clone)]
pub struct EventBus {
    events: broadcast::Sender<SyncEvent>,
    conflicts: Arc<watch::Sender<bool>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (conflicts, _) = watch::channel(false);
        Self {
            events,
            conflicts: Arc::new(conflicts),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn conflict_indicator(&self) -> watch::Receiver<bool> {
        self.conflicts.subscribe()
    }

    pub fn conflicts_exist(&self) -> bool {
        *self.conflicts.borrow()
    }

    pub fn publish(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("No subscribers for sync event {:?}", event);
        }
    }

    pub fn set_conflicts_exist(&self, exist: bool) {
        self.conflicts.send_if_modified(|current| {
            let changed = *current != exist;
            *current = exist;
            changed
        });
    }
}
