//! Pure comparison of the local store against the remote collection.

use std::collections::{HashMap, HashSet};

use crate::models::{Entry, SyncId};
use crate::remote::RemoteEntry;

/// What the pull phase has to do, computed without touching either side
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Remote records with no local counterpart
    pub insert_locally: Vec<RemoteEntry>,
    /// Remote records whose local counterpart has differing content
    pub conflicting: Vec<RemoteEntry>,
    /// Records present on both sides with equal content
    pub unchanged: Vec<SyncId>,
    /// Synced local entries whose remote record is gone
    pub delete_locally: Vec<Entry>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.insert_locally.is_empty()
            && self.conflicting.is_empty()
            && self.delete_locally.is_empty()
    }
}

/// Compare synced local entries with the remote collection.
///
/// Unsynced local entries are ignored. Remote records whose deletion is still
/// pending are skipped so a failed remote delete does not resurrect the entry.
/// Duplicate remote IDs keep their first occurrence.
pub fn plan(
    local: &[Entry],
    remote: Vec<RemoteEntry>,
    pending_deletions: &HashSet<SyncId>,
) -> ReconcilePlan {
    let local_by_sync_id: HashMap<&SyncId, &Entry> = local
        .iter()
        .filter_map(|entry| entry.sync_id.as_ref().map(|sync_id| (sync_id, entry)))
        .collect();

    let mut plan = ReconcilePlan::default();
    let mut seen_remote: HashSet<SyncId> = HashSet::with_capacity(remote.len());

    for record in remote {
        if !seen_remote.insert(record.sync_id.clone()) {
            tracing::warn!("Remote returned duplicate record {}", record.sync_id);
            continue;
        }
        if pending_deletions.contains(&record.sync_id) {
            continue;
        }
        match local_by_sync_id.get(&record.sync_id) {
            None => plan.insert_locally.push(record),
            Some(entry) if entry.content == record.content => plan.unchanged.push(record.sync_id),
            Some(_) => plan.conflicting.push(record),
        }
    }

    plan.delete_locally = local
        .iter()
        .filter(|entry| {
            entry
                .sync_id
                .as_ref()
                .is_some_and(|sync_id| !seen_remote.contains(sync_id))
        })
        .cloned()
        .collect();

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryContent;
    use pretty_assertions::assert_eq;

    fn synced(sync_id: &str, content: &EntryContent) -> Entry {
        Entry::from_remote(SyncId::new(sync_id), content.clone())
    }

    fn remote(sync_id: &str, content: &EntryContent) -> RemoteEntry {
        RemoteEntry::new(SyncId::new(sync_id), content.clone())
    }

    #[test]
    fn classifies_every_category() {
        let same = EntryContent::new("same");
        let mut changed = same.clone();
        changed.title = "changed".to_string();

        let local = vec![
            Entry::new(EntryContent::new("never pushed")),
            synced("1", &same),
            synced("2", &same),
            synced("3", &same),
        ];
        let remote_records = vec![remote("1", &same), remote("2", &changed), remote("4", &same)];

        let plan = plan(&local, remote_records, &HashSet::new());

        assert_eq!(plan.insert_locally, vec![remote("4", &same)]);
        assert_eq!(plan.conflicting, vec![remote("2", &changed)]);
        assert_eq!(plan.unchanged, vec![SyncId::new("1")]);
        assert_eq!(plan.delete_locally.len(), 1);
        assert_eq!(plan.delete_locally[0].sync_id, Some(SyncId::new("3")));
    }

    #[test]
    fn pending_deletions_are_not_reinserted() {
        let content = EntryContent::new("deleted here");
        let pending: HashSet<SyncId> = [SyncId::new("9")].into_iter().collect();

        let plan = plan(&[], vec![remote("9", &content)], &pending);

        assert!(plan.is_empty());
    }

    #[test]
    fn timestamp_difference_is_a_conflict() {
        let local_content = EntryContent::new("note");
        let mut remote_content = local_content.clone();
        remote_content.viewed += chrono::Duration::milliseconds(1);

        let plan = plan(
            &[synced("5", &local_content)],
            vec![remote("5", &remote_content)],
            &HashSet::new(),
        );

        assert_eq!(plan.conflicting, vec![remote("5", &remote_content)]);
    }

    #[test]
    fn duplicate_remote_ids_keep_first() {
        let first = EntryContent::new("first");
        let second = EntryContent::new("second");

        let plan = plan(
            &[],
            vec![remote("1", &first), remote("1", &second)],
            &HashSet::new(),
        );

        assert_eq!(plan.insert_locally, vec![remote("1", &first)]);
    }

    #[test]
    fn identical_sides_plan_nothing() {
        let content = EntryContent::new("stable");
        let plan = plan(
            &[synced("1", &content)],
            vec![remote("1", &content)],
            &HashSet::new(),
        );
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, vec![SyncId::new("1")]);
    }
}
