//! User-driven resolution of entries that differ between the two sides.

use std::sync::Arc;

use crate::db::{LocalStore, SettingsRepository};
use crate::error::{Error, Result};
use crate::models::{Entry, JournalAction, JournalStatus, SyncId};
use crate::remote::{RemoteClient, RemoteEntry, RemoteError};

use super::events::{SyncEvent, SyncPhase};
use super::pass::PassContext;

/// Which side wins a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite the local entry with the remote record
    KeepRemote,
    /// Overwrite the remote record with the local entry
    KeepLocal,
}

/// Both versions of a conflicting entry, for presentation to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPair {
    pub local: Entry,
    pub remote: RemoteEntry,
}

/// Lists conflicts and applies resolutions
pub struct ConflictResolver<S, R> {
    ctx: Arc<PassContext<S, R>>,
}

impl<S, R> ConflictResolver<S, R>
where
    S: LocalStore + SettingsRepository,
    R: RemoteClient,
{
    pub(crate) const fn new(ctx: Arc<PassContext<S, R>>) -> Self {
        Self { ctx }
    }

    /// Sync IDs of all conflicting entries, oldest first
    pub async fn list(&self) -> Result<Vec<SyncId>> {
        self.ctx.store.list_conflicts().await
    }

    /// Fetch both sides of a conflict
    pub async fn inspect(&self, sync_id: &SyncId) -> Result<ConflictPair> {
        self.ensure_conflict(sync_id).await?;
        let local = self.local_entry(sync_id).await?;
        let remote = self.remote_record(sync_id).await?;
        Ok(ConflictPair { local, remote })
    }

    /// Apply the user's choice and clear the marker
    pub async fn resolve(&self, sync_id: &SyncId, resolution: Resolution) -> Result<()> {
        self.ensure_conflict(sync_id).await?;
        let local = self.local_entry(sync_id).await?;
        let ctx = &self.ctx;

        let action = match resolution {
            Resolution::KeepRemote => {
                let remote = self.remote_record(sync_id).await?;
                if !ctx.store.update_content(&local.id, &remote.content).await? {
                    return Err(Error::NotFound(format!("local entry {}", local.id)));
                }
                JournalAction::AddedToLocal
            }
            Resolution::KeepLocal => {
                ctx.remote_call(ctx.remote.update(&ctx.user_id, sync_id, &local.content))
                    .await?;
                JournalAction::AddedToServer
            }
        };

        ctx.store.remove_conflict(sync_id).await?;
        tracing::info!("Resolved conflict {} with {:?}", sync_id, resolution);

        ctx.journal.record(action, JournalStatus::Ok, 1).await;
        ctx.events
            .publish(SyncEvent::finished(SyncPhase::Resolution, 1, 0));
        ctx.refresh_conflict_indicator().await;
        Ok(())
    }

    async fn ensure_conflict(&self, sync_id: &SyncId) -> Result<()> {
        if self.ctx.store.has_conflict(sync_id).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("conflict {sync_id}")))
        }
    }

    async fn local_entry(&self, sync_id: &SyncId) -> Result<Entry> {
        self.ctx
            .store
            .get_entry_by_sync_id(sync_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("local entry for {sync_id}")))
    }

    async fn remote_record(&self, sync_id: &SyncId) -> Result<RemoteEntry> {
        let ctx = &self.ctx;
        ctx.remote_call(ctx.remote.get(&ctx.user_id, sync_id))
            .await?
            .ok_or_else(|| Error::Remote(RemoteError::NotFound(sync_id.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::db::LibSqlStore;
    use crate::models::EntryContent;
    use crate::remote::{MemoryRemote, RemoteOp};
    use crate::sync::events::EventBus;
    use crate::sync::journal::Journal;
    use pretty_assertions::assert_eq;

    type TestContext = Arc<PassContext<LibSqlStore, MemoryRemote>>;

    async fn conflicted() -> (ConflictResolver<LibSqlStore, MemoryRemote>, TestContext, SyncId) {
        let store = Arc::new(LibSqlStore::open_in_memory().await.unwrap());
        let ctx = Arc::new(PassContext {
            user_id: "alice".to_string(),
            remote_timeout: Duration::from_secs(5),
            journal: Journal::new(Arc::clone(&store)),
            store,
            remote: Arc::new(MemoryRemote::new()),
            events: EventBus::new(16),
        });

        let sync_id = SyncId::new("1");
        ctx.store
            .insert_entry(&Entry::from_remote(sync_id.clone(), EntryContent::new("local")))
            .await
            .unwrap();
        ctx.remote.insert("alice", "1", EntryContent::new("remote"));
        ctx.store.add_conflict(&sync_id).await.unwrap();
        ctx.events.set_conflicts_exist(true);

        (ConflictResolver::new(Arc::clone(&ctx)), ctx, sync_id)
    }

    #[tokio::test]
    async fn keep_remote_overwrites_local() {
        let (resolver, ctx, sync_id) = conflicted().await;

        let pair = resolver.inspect(&sync_id).await.unwrap();
        assert_eq!(pair.local.content.title, "local");
        assert_eq!(pair.remote.content.title, "remote");

        resolver
            .resolve(&sync_id, Resolution::KeepRemote)
            .await
            .unwrap();

        let local = ctx.store.get_entry_by_sync_id(&sync_id).await.unwrap().unwrap();
        assert_eq!(local.content.title, "remote");
        assert!(resolver.list().await.unwrap().is_empty());
        assert!(!ctx.events.conflicts_exist());
        let history = ctx.journal.history(1).await.unwrap();
        assert_eq!(history[0].action, JournalAction::AddedToLocal);
        assert_eq!(history[0].affected, 1);
    }

    #[tokio::test]
    async fn keep_local_overwrites_remote() {
        let (resolver, ctx, sync_id) = conflicted().await;

        resolver
            .resolve(&sync_id, Resolution::KeepLocal)
            .await
            .unwrap();

        assert_eq!(ctx.remote.record("alice", &sync_id).unwrap().title, "local");
        assert!(!ctx.store.has_conflict(&sync_id).await.unwrap());
        let history = ctx.journal.history(1).await.unwrap();
        assert_eq!(history[0].action, JournalAction::AddedToServer);
    }

    #[tokio::test]
    async fn failed_remote_update_keeps_marker() {
        let (resolver, ctx, sync_id) = conflicted().await;
        ctx.remote.fail_next(RemoteOp::Update, 1);

        assert!(resolver
            .resolve(&sync_id, Resolution::KeepLocal)
            .await
            .is_err());
        assert!(ctx.store.has_conflict(&sync_id).await.unwrap());
        assert!(ctx.events.conflicts_exist());
    }

    #[tokio::test]
    async fn resolving_unknown_conflict_is_not_found() {
        let (resolver, _ctx, _) = conflicted().await;
        let result = resolver
            .resolve(&SyncId::new("99"), Resolution::KeepRemote)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
