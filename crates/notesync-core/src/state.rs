//! Shared cross-platform state types.

/// Whether the coordinator is syncing, waiting for network, or idle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncRunState {
    /// No pass running and none owed
    Idle,
    /// A pass is executing
    Running,
    /// A request was deferred and has not yet been satisfied
    Pending,
}
