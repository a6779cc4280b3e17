//! One sync pass: push new entries, push deletions, pull and reconcile.
//!
//! A failing item is logged and counted; it never stops the remaining items or
//! the later phases.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{EntryFilter, LocalStore, SettingsRepository};
use crate::models::{Entry, JournalAction, JournalStatus, SyncId};
use crate::remote::{RemoteClient, RemoteEntry, RemoteError, RemoteResult};

use super::events::{EventBus, SyncEvent, SyncPhase};
use super::journal::Journal;
use super::reconcile;

/// Successes and failures of a push phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseCounts {
    pub succeeded: u32,
    pub failed: u32,
}

/// Outcome of the pull-reconcile phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullCounts {
    /// Remote records inserted locally
    pub added: u32,
    /// Records currently marked as conflicting, new or retained
    pub conflicting: u32,
    /// Conflict markers created by this pass
    pub new_conflicts: u32,
    /// Local entries removed because their remote record is gone
    pub deleted: u32,
    /// Failed items, or 1 when the remote collection could not be fetched
    pub failed: u32,
}

/// Summary of a completed pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub pushed: PhaseCounts,
    pub deleted_remote: PhaseCounts,
    pub pulled: PullCounts,
    /// Conflict markers left after the pass
    pub open_conflicts: u32,
}

impl PassReport {
    /// Items changed on either side, plus conflicting records
    pub const fn total_affected(&self) -> u32 {
        self.pushed.succeeded
            + self.deleted_remote.succeeded
            + self.pulled.added
            + self.pulled.conflicting
            + self.pulled.deleted
    }

    pub const fn failed(&self) -> u32 {
        self.pushed.failed + self.deleted_remote.failed + self.pulled.failed
    }

    pub const fn status(&self) -> JournalStatus {
        JournalStatus::from_failures(self.failed())
    }
}

/// Bound a remote call by `limit`, mapping expiry to [`RemoteError::Timeout`]
pub(crate) async fn call_remote<T>(
    limit: Duration,
    call: impl Future<Output = RemoteResult<T>>,
) -> RemoteResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(RemoteError::Timeout(limit)))
}

/// Everything a pass needs, shared by the coordinator and the conflict resolver
pub(crate) struct PassContext<S, R> {
    pub(crate) user_id: String,
    pub(crate) remote_timeout: Duration,
    pub(crate) store: Arc<S>,
    pub(crate) remote: Arc<R>,
    pub(crate) journal: Journal<S>,
    pub(crate) events: EventBus,
}

impl<S, R> PassContext<S, R>
where
    S: LocalStore + SettingsRepository,
    R: RemoteClient,
{
    pub(crate) async fn remote_call<T>(
        &self,
        call: impl Future<Output = RemoteResult<T>>,
    ) -> RemoteResult<T> {
        call_remote(self.remote_timeout, call).await
    }

    pub(crate) async fn run(&self) -> PassReport {
        tracing::info!("Starting sync pass for user {}", self.user_id);

        let pushed = self.push_new().await;
        let deleted_remote = self.push_deletions().await;
        let pulled = self.pull_and_reconcile().await;
        let open_conflicts = self.refresh_conflict_indicator().await;

        if let Err(e) = self.store.set_pending_sync(&self.user_id, false).await {
            tracing::warn!("Failed to clear pending sync flag: {}", e);
        }

        let report = PassReport {
            pushed,
            deleted_remote,
            pulled,
            open_conflicts,
        };
        self.journal
            .record(JournalAction::PassCompleted, report.status(), report.total_affected())
            .await;
        self.events.publish(SyncEvent::finished(
            SyncPhase::Pass,
            report.total_affected(),
            report.failed(),
        ));

        tracing::info!(
            "Sync pass finished: {} affected, {} failed, {} open conflicts",
            report.total_affected(),
            report.failed(),
            open_conflicts
        );
        report
    }

    async fn push_new(&self) -> PhaseCounts {
        let mut counts = PhaseCounts::default();

        match self.store.list_entries(EntryFilter::Unsynced).await {
            Ok(entries) => {
                for entry in entries {
                    if self.push_entry(&entry).await {
                        counts.succeeded += 1;
                    } else {
                        counts.failed += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list unsynced entries: {}", e);
                counts.failed += 1;
            }
        }

        self.finish_phase(SyncPhase::PushNew, JournalAction::AddedToServer, counts)
            .await;
        counts
    }

    async fn push_entry(&self, entry: &Entry) -> bool {
        let sync_id = match self
            .remote_call(self.remote.add(&self.user_id, entry))
            .await
        {
            Ok(sync_id) => sync_id,
            Err(e) => {
                tracing::warn!("Failed to push entry {}: {}", entry.id, e);
                return false;
            }
        };

        match self.store.assign_sync_id(&entry.id, &sync_id).await {
            Ok(true) => true,
            Ok(false) => {
                // Removed locally while the add was in flight
                tracing::warn!(
                    "Entry {} changed during push; scheduling remote delete of {}",
                    entry.id,
                    sync_id
                );
                if let Ok(None) = self.store.get_entry(&entry.id).await {
                    if let Err(e) = self.store.add_pending_deletion(&sync_id).await {
                        tracing::warn!("Failed to record pending deletion {}: {}", sync_id, e);
                    }
                }
                false
            }
            Err(e) => {
                tracing::warn!("Failed to store sync id {} for {}: {}", sync_id, entry.id, e);
                false
            }
        }
    }

    async fn push_deletions(&self) -> PhaseCounts {
        let mut counts = PhaseCounts::default();

        match self.store.list_pending_deletions().await {
            Ok(pending) => {
                for sync_id in pending {
                    if self.push_deletion(&sync_id).await {
                        counts.succeeded += 1;
                    } else {
                        counts.failed += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to list pending deletions: {}", e);
                counts.failed += 1;
            }
        }

        self.finish_phase(
            SyncPhase::PushDeletions,
            JournalAction::DeletedFromServer,
            counts,
        )
        .await;
        counts
    }

    async fn push_deletion(&self, sync_id: &SyncId) -> bool {
        match self
            .remote_call(self.remote.delete(&self.user_id, sync_id))
            .await
        {
            Ok(()) => {}
            Err(RemoteError::NotFound(_)) => {
                tracing::debug!("Remote record {} already gone", sync_id);
            }
            Err(e) => {
                tracing::warn!("Failed to delete remote record {}: {}", sync_id, e);
                return false;
            }
        }

        if let Err(e) = self.store.remove_conflict(sync_id).await {
            tracing::warn!("Failed to clear conflict marker {}: {}", sync_id, e);
        }
        match self.store.remove_pending_deletion(sync_id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Failed to clear pending deletion {}: {}", sync_id, e);
                false
            }
        }
    }

    async fn pull_and_reconcile(&self) -> PullCounts {
        let mut counts = PullCounts::default();

        let Some((local, remote, pending)) = self.load_reconcile_inputs().await else {
            counts.failed = 1;
            self.finish_pull(counts).await;
            return counts;
        };

        let plan = reconcile::plan(&local, remote, &pending);

        for record in plan.insert_locally {
            match self.insert_remote_record(&record).await {
                Ok(true) => counts.added += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to insert remote record {}: {}", record.sync_id, e);
                    counts.failed += 1;
                }
            }
        }

        for record in plan.conflicting {
            match self.mark_conflict(&record).await {
                Ok(Some(created)) => {
                    counts.conflicting += 1;
                    if created {
                        tracing::info!("Entry {} differs from its remote record", record.sync_id);
                        counts.new_conflicts += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to mark conflict {}: {}", record.sync_id, e);
                    counts.failed += 1;
                }
            }
        }

        for entry in plan.delete_locally {
            match self.delete_orphan(&entry).await {
                Ok(true) => counts.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to delete local entry {}: {}", entry.id, e);
                    counts.failed += 1;
                }
            }
        }

        self.finish_pull(counts).await;
        counts
    }

    async fn load_reconcile_inputs(
        &self,
    ) -> Option<(Vec<Entry>, Vec<RemoteEntry>, HashSet<SyncId>)> {
        let remote = match self.remote_call(self.remote.get_all(&self.user_id)).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!("Failed to fetch remote entries: {}", e);
                return None;
            }
        };
        let local = match self.store.list_entries(EntryFilter::Synced).await {
            Ok(local) => local,
            Err(e) => {
                tracing::warn!("Failed to list synced entries: {}", e);
                return None;
            }
        };
        let pending = match self.store.list_pending_deletions().await {
            Ok(pending) => pending.into_iter().collect(),
            Err(e) => {
                tracing::warn!("Failed to list pending deletions: {}", e);
                return None;
            }
        };
        Some((local, remote, pending))
    }

    /// Insert unless a local entry with this sync id appeared meanwhile
    async fn insert_remote_record(&self, record: &RemoteEntry) -> crate::Result<bool> {
        if self
            .store
            .get_entry_by_sync_id(&record.sync_id)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        let entry = Entry::from_remote(record.sync_id.clone(), record.content.clone());
        self.store.insert_entry(&entry).await?;
        Ok(true)
    }

    /// Mark a conflict unless the local entry vanished or now matches the
    /// remote record. Returns whether the marker is new, or `None` if skipped.
    async fn mark_conflict(&self, record: &RemoteEntry) -> crate::Result<Option<bool>> {
        let Some(current) = self.store.get_entry_by_sync_id(&record.sync_id).await? else {
            return Ok(None);
        };
        if current.content == record.content {
            tracing::debug!("Entry {} matches its remote record again", record.sync_id);
            return Ok(None);
        }
        self.store.add_conflict(&record.sync_id).await.map(Some)
    }

    /// Delete unless the entry vanished or was relinked meanwhile
    async fn delete_orphan(&self, entry: &Entry) -> crate::Result<bool> {
        let Some(current) = self.store.get_entry(&entry.id).await? else {
            return Ok(false);
        };
        if current.sync_id != entry.sync_id {
            return Ok(false);
        }
        let deleted = self.store.delete_entry(&entry.id).await?;
        if let Some(sync_id) = &entry.sync_id {
            self.store.remove_conflict(sync_id).await?;
        }
        Ok(deleted)
    }

    async fn finish_phase(&self, phase: SyncPhase, action: JournalAction, counts: PhaseCounts) {
        self.journal
            .record(
                action,
                JournalStatus::from_failures(counts.failed),
                counts.succeeded,
            )
            .await;
        self.events
            .publish(SyncEvent::finished(phase, counts.succeeded, counts.failed));
    }

    async fn finish_pull(&self, counts: PullCounts) {
        let status = JournalStatus::from_failures(counts.failed);
        self.journal
            .record(JournalAction::AddedToLocal, status, counts.added)
            .await;
        self.journal
            .record(JournalAction::Conflicting, status, counts.conflicting)
            .await;
        self.journal
            .record(JournalAction::DeletedFromLocal, status, counts.deleted)
            .await;
        self.events.publish(SyncEvent::finished(
            SyncPhase::PullReconcile,
            counts.added + counts.conflicting + counts.deleted,
            counts.failed,
        ));
    }

    /// Republish whether any conflict marker exists; returns the marker count
    pub(crate) async fn refresh_conflict_indicator(&self) -> u32 {
        match self.store.list_conflicts().await {
            Ok(conflicts) => {
                self.events.set_conflicts_exist(!conflicts.is_empty());
                u32::try_from(conflicts.len()).unwrap_or(u32::MAX)
            }
            Err(e) => {
                tracing::warn!("Failed to list conflicts: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LibSqlStore;
    use crate::models::EntryContent;
    use crate::remote::{MemoryRemote, RemoteOp};
    use pretty_assertions::assert_eq;

    async fn context() -> PassContext<LibSqlStore, MemoryRemote> {
        let store = Arc::new(LibSqlStore::open_in_memory().await.unwrap());
        PassContext {
            user_id: "alice".to_string(),
            remote_timeout: Duration::from_secs(5),
            journal: Journal::new(Arc::clone(&store)),
            store,
            remote: Arc::new(MemoryRemote::new()),
            events: EventBus::new(16),
        }
    }

    #[tokio::test]
    async fn call_remote_times_out() {
        let result: RemoteResult<()> = call_remote(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RemoteError::Timeout(_))));
    }

    #[tokio::test]
    async fn failed_push_is_counted_and_retried_next_pass() {
        let ctx = context().await;
        let entry = Entry::new(EntryContent::new("offline note"));
        ctx.store.insert_entry(&entry).await.unwrap();
        ctx.remote.fail_next(RemoteOp::Add, 1);

        let first = ctx.push_new().await;
        assert_eq!(first, PhaseCounts { succeeded: 0, failed: 1 });
        assert!(!ctx.store.get_entry(&entry.id).await.unwrap().unwrap().is_synced());

        let second = ctx.push_new().await;
        assert_eq!(second, PhaseCounts { succeeded: 1, failed: 0 });
        assert!(ctx.store.get_entry(&entry.id).await.unwrap().unwrap().is_synced());
    }

    #[tokio::test]
    async fn delete_of_missing_remote_record_succeeds() {
        let ctx = context().await;
        let sync_id = SyncId::new("404");
        ctx.store.add_pending_deletion(&sync_id).await.unwrap();
        ctx.store.add_conflict(&sync_id).await.unwrap();

        let counts = ctx.push_deletions().await;

        assert_eq!(counts, PhaseCounts { succeeded: 1, failed: 0 });
        assert!(ctx.store.list_pending_deletions().await.unwrap().is_empty());
        assert!(!ctx.store.has_conflict(&sync_id).await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_remote_fails_pull_with_zero_counts() {
        let ctx = context().await;
        ctx.remote.fail_next(RemoteOp::GetAll, 1);

        let counts = ctx.pull_and_reconcile().await;

        assert_eq!(counts, PullCounts { failed: 1, ..PullCounts::default() });
        let history = ctx.journal.history(10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history
            .iter()
            .all(|record| record.status == JournalStatus::Error && record.affected == 0));
    }

    #[tokio::test]
    async fn conflict_resolved_after_planning_is_not_marked() {
        let ctx = context().await;
        let sync_id = SyncId::new("7");
        let local = Entry::from_remote(sync_id.clone(), EntryContent::new("local"));
        ctx.store.insert_entry(&local).await.unwrap();
        ctx.remote.insert("alice", "7", EntryContent::new("remote"));

        let remote = ctx.remote.get_all("alice").await.unwrap();
        let plan = reconcile::plan(&[local.clone()], remote, &HashSet::new());
        assert_eq!(plan.conflicting.len(), 1);

        // Resolved in favour of the remote before the pass marks it
        let record = &plan.conflicting[0];
        ctx.store
            .update_content(&local.id, &record.content)
            .await
            .unwrap();

        assert_eq!(ctx.mark_conflict(record).await.unwrap(), None);
        assert!(!ctx.store.has_conflict(&sync_id).await.unwrap());

        ctx.store.delete_entry(&local.id).await.unwrap();
        assert_eq!(ctx.mark_conflict(record).await.unwrap(), None);
        assert!(!ctx.store.has_conflict(&sync_id).await.unwrap());
    }

    #[tokio::test]
    async fn retained_conflicts_are_counted_but_not_new() {
        let ctx = context().await;
        let local = Entry::from_remote(SyncId::new("1"), EntryContent::new("local"));
        ctx.store.insert_entry(&local).await.unwrap();
        ctx.remote.insert("alice", "1", EntryContent::new("remote"));

        let first = ctx.pull_and_reconcile().await;
        let second = ctx.pull_and_reconcile().await;

        assert_eq!((first.conflicting, first.new_conflicts), (1, 1));
        assert_eq!((second.conflicting, second.new_conflicts), (1, 0));
        assert_eq!(ctx.refresh_conflict_indicator().await, 1);
        assert!(ctx.events.conflicts_exist());
    }
}
