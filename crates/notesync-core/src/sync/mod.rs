//! Offline-first synchronization between the local store and the remote service
//!
//! A pass runs three phases in order: push unsynced entries, push pending
//! deletions, then pull the remote collection and reconcile it. Entries that
//! differ on both sides are never merged automatically; they are marked as
//! conflicts until the user resolves them.

mod config;
mod conflicts;
mod coordinator;
mod events;
mod journal;
mod network;
mod pass;
pub mod reconcile;

pub use config::SyncConfig;
pub use conflicts::{ConflictPair, ConflictResolver, Resolution};
pub use coordinator::{PassTicket, SyncCoordinator, SyncRequest};
pub use events::{EventBus, EventStatus, SyncEvent, SyncPhase};
pub use journal::Journal;
pub use network::{
    decide, Connectivity, ConnectivityProbe, ConnectivityState, DeferReason, GateDecision,
    NetworkGate,
};
pub use pass::{PassReport, PhaseCounts, PullCounts};
pub use reconcile::ReconcilePlan;
