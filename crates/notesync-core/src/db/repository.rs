//! Local store repository

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Rows, Value};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::models::{Entry, EntryContent, EntryId, JournalRecord, SyncId};
use crate::util::{from_millis, now_millis};

use super::Database;

const ENTRY_COLUMNS: &str =
    "id, sync_id, title, description, color, image_url, created_at, edited_at, viewed_at";

/// Predicate for reading entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFilter {
    /// Every entry
    All,
    /// Entries that were never pushed (`sync_id` is `None`)
    Unsynced,
    /// Entries with a remote counterpart
    Synced,
}

impl EntryFilter {
    const fn where_clause(self) -> &'static str {
        match self {
            Self::All => "",
            Self::Unsynced => " WHERE sync_id IS NULL",
            Self::Synced => " WHERE sync_id IS NOT NULL",
        }
    }
}

/// Typed storage for entries, pending deletions, conflict markers, and the journal
///
/// Reconciliation only talks to this trait, never to SQL. Methods that report
/// `bool` return whether a row was actually affected, so callers can detect rows
/// that changed underneath them.
pub trait LocalStore: Send + Sync {
    /// List entries matching `filter`, most recently edited first
    fn list_entries(&self, filter: EntryFilter) -> impl Future<Output = Result<Vec<Entry>>> + Send;

    /// Get an entry by local ID
    fn get_entry(&self, id: &EntryId) -> impl Future<Output = Result<Option<Entry>>> + Send;

    /// Get an entry by remote ID
    fn get_entry_by_sync_id(
        &self,
        sync_id: &SyncId,
    ) -> impl Future<Output = Result<Option<Entry>>> + Send;

    /// Insert a new entry
    fn insert_entry(&self, entry: &Entry) -> impl Future<Output = Result<()>> + Send;

    /// Replace an entry's user-visible fields
    fn update_content(
        &self,
        id: &EntryId,
        content: &EntryContent,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Apply a user edit in place: text fields, image and edit time.
    ///
    /// Creation and view times are left as stored.
    fn edit_content(
        &self,
        id: &EntryId,
        content: &EntryContent,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Set only the view time
    fn mark_viewed(
        &self,
        id: &EntryId,
        viewed: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Record the remote ID of a freshly pushed entry
    ///
    /// Only succeeds while the entry is still unsynced.
    fn assign_sync_id(
        &self,
        id: &EntryId,
        sync_id: &SyncId,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete an entry without any sync bookkeeping
    fn delete_entry(&self, id: &EntryId) -> impl Future<Output = Result<bool>> + Send;

    /// Delete an entry on behalf of the user
    ///
    /// Atomically records a pending deletion for synced entries and drops the
    /// entry's conflict marker. Returns the removed entry.
    fn discard_entry(&self, id: &EntryId) -> impl Future<Output = Result<Option<Entry>>> + Send;

    /// List sync IDs awaiting remote deletion
    fn list_pending_deletions(&self) -> impl Future<Output = Result<Vec<SyncId>>> + Send;

    /// Record a sync ID for remote deletion (idempotent)
    fn add_pending_deletion(&self, sync_id: &SyncId) -> impl Future<Output = Result<()>> + Send;

    /// Forget a pending deletion after the remote confirmed it
    fn remove_pending_deletion(&self, sync_id: &SyncId)
        -> impl Future<Output = Result<bool>> + Send;

    /// List sync IDs with a conflict marker
    fn list_conflicts(&self) -> impl Future<Output = Result<Vec<SyncId>>> + Send;

    /// Whether a conflict marker exists for the sync ID
    fn has_conflict(&self, sync_id: &SyncId) -> impl Future<Output = Result<bool>> + Send;

    /// Create a conflict marker; returns `false` if it already existed
    fn add_conflict(&self, sync_id: &SyncId) -> impl Future<Output = Result<bool>> + Send;

    /// Remove a conflict marker
    fn remove_conflict(&self, sync_id: &SyncId) -> impl Future<Output = Result<bool>> + Send;

    /// Append a journal record
    fn append_journal(&self, record: &JournalRecord) -> impl Future<Output = Result<()>> + Send;

    /// List journal records, newest first
    fn list_journal(&self, limit: usize) -> impl Future<Output = Result<Vec<JournalRecord>>> + Send;

    /// Delete every journal record (explicit user action only)
    fn clear_journal(&self) -> impl Future<Output = Result<u64>> + Send;
}

/// libSQL implementation of `LocalStore`
///
/// Cloning is cheap; all clones share one connection guarded by an async mutex,
/// so multi-statement writes are never interleaved with other callers.
#[derive(Clone)]
pub struct LibSqlStore {
    db: Arc<Mutex<Database>>,
}

impl LibSqlStore {
    /// Wrap an already opened database
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open a store backed by a database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(Database::open(path).await?))
    }

    /// Open an in-memory store (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    pub(super) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    async fn query_entries(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Entry>> {
        let db = self.lock().await;
        let rows = db.connection().query(sql, params).await?;
        collect_entries(rows).await
    }

    async fn query_sync_ids(&self, sql: &str) -> Result<Vec<SyncId>> {
        let db = self.lock().await;
        let mut rows = db.connection().query(sql, ()).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(SyncId::new(row.get::<String>(0)?));
        }
        Ok(ids)
    }
}

impl LocalStore for LibSqlStore {
    async fn list_entries(&self, filter: EntryFilter) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries{} ORDER BY edited_at DESC",
            filter.where_clause()
        );
        self.query_entries(&sql, Vec::new()).await
    }

    async fn get_entry(&self, id: &EntryId) -> Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?");
        let entries = self
            .query_entries(&sql, vec![Value::Text(id.as_str())])
            .await?;
        Ok(entries.into_iter().next())
    }

    async fn get_entry_by_sync_id(&self, sync_id: &SyncId) -> Result<Option<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE sync_id = ?");
        let entries = self
            .query_entries(&sql, vec![Value::Text(sync_id.to_string())])
            .await?;
        Ok(entries.into_iter().next())
    }

    async fn insert_entry(&self, entry: &Entry) -> Result<()> {
        let db = self.lock().await;
        insert_entry_row(db.connection(), entry).await
    }

    async fn update_content(&self, id: &EntryId, content: &EntryContent) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute(
                "UPDATE entries
                 SET title = ?, description = ?, color = ?, image_url = ?,
                     created_at = ?, edited_at = ?, viewed_at = ?
                 WHERE id = ?",
                vec![
                    Value::Text(content.title.clone()),
                    Value::Text(content.description.clone()),
                    Value::Text(content.color.clone()),
                    nullable_text(content.image_url.as_deref()),
                    Value::Integer(content.created.timestamp_millis()),
                    Value::Integer(content.edited.timestamp_millis()),
                    Value::Integer(content.viewed.timestamp_millis()),
                    Value::Text(id.as_str()),
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn edit_content(&self, id: &EntryId, content: &EntryContent) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute(
                "UPDATE entries
                 SET title = ?, description = ?, color = ?, image_url = ?, edited_at = ?
                 WHERE id = ?",
                vec![
                    Value::Text(content.title.clone()),
                    Value::Text(content.description.clone()),
                    Value::Text(content.color.clone()),
                    nullable_text(content.image_url.as_deref()),
                    Value::Integer(content.edited.timestamp_millis()),
                    Value::Text(id.as_str()),
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn mark_viewed(&self, id: &EntryId, viewed: DateTime<Utc>) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute(
                "UPDATE entries SET viewed_at = ? WHERE id = ?",
                vec![
                    Value::Integer(viewed.timestamp_millis()),
                    Value::Text(id.as_str()),
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn assign_sync_id(&self, id: &EntryId, sync_id: &SyncId) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute(
                "UPDATE entries SET sync_id = ? WHERE id = ? AND sync_id IS NULL",
                [sync_id.to_string(), id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn delete_entry(&self, id: &EntryId) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute("DELETE FROM entries WHERE id = ?", [id.as_str()])
            .await?;
        Ok(rows > 0)
    }

    async fn discard_entry(&self, id: &EntryId) -> Result<Option<Entry>> {
        let db = self.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN TRANSACTION", ()).await?;
        match discard_entry_rows(conn, id).await {
            Ok(entry) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                Ok(entry)
            }
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                Err(e)
            }
        }
    }

    async fn list_pending_deletions(&self) -> Result<Vec<SyncId>> {
        self.query_sync_ids("SELECT sync_id FROM pending_deletions ORDER BY created_at ASC")
            .await
    }

    async fn add_pending_deletion(&self, sync_id: &SyncId) -> Result<()> {
        let db = self.lock().await;
        insert_pending_deletion(db.connection(), sync_id).await
    }

    async fn remove_pending_deletion(&self, sync_id: &SyncId) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute(
                "DELETE FROM pending_deletions WHERE sync_id = ?",
                [sync_id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn list_conflicts(&self) -> Result<Vec<SyncId>> {
        self.query_sync_ids("SELECT sync_id FROM conflicts ORDER BY detected_at ASC")
            .await
    }

    async fn has_conflict(&self, sync_id: &SyncId) -> Result<bool> {
        let db = self.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT EXISTS(SELECT 1 FROM conflicts WHERE sync_id = ?)",
                [sync_id.as_str()],
            )
            .await?;
        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }

    async fn add_conflict(&self, sync_id: &SyncId) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute(
                "INSERT OR IGNORE INTO conflicts (sync_id, detected_at) VALUES (?, ?)",
                vec![
                    Value::Text(sync_id.to_string()),
                    Value::Integer(now_millis().timestamp_millis()),
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn remove_conflict(&self, sync_id: &SyncId) -> Result<bool> {
        let db = self.lock().await;
        let rows = db
            .connection()
            .execute("DELETE FROM conflicts WHERE sync_id = ?", [sync_id.as_str()])
            .await?;
        Ok(rows > 0)
    }

    async fn append_journal(&self, record: &JournalRecord) -> Result<()> {
        let db = self.lock().await;
        db.connection()
            .execute(
                "INSERT INTO journal (recorded_at, action, status, affected) VALUES (?, ?, ?, ?)",
                vec![
                    Value::Integer(record.recorded_at.timestamp_millis()),
                    Value::Text(record.action.as_str().to_string()),
                    Value::Text(record.status.as_str().to_string()),
                    Value::Integer(i64::from(record.affected)),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_journal(&self, limit: usize) -> Result<Vec<JournalRecord>> {
        let db = self.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT recorded_at, action, status, affected
                 FROM journal
                 ORDER BY id DESC
                 LIMIT ?",
                [i64::try_from(limit).unwrap_or(i64::MAX)],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_journal_record(&row)?);
        }
        Ok(records)
    }

    async fn clear_journal(&self) -> Result<u64> {
        let db = self.lock().await;
        let rows = db.connection().execute("DELETE FROM journal", ()).await?;
        tracing::info!("Cleared {rows} journal records");
        Ok(rows)
    }
}

async fn insert_entry_row(conn: &Connection, entry: &Entry) -> Result<()> {
    conn.execute(
        "INSERT INTO entries (id, sync_id, title, description, color, image_url, created_at, edited_at, viewed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        vec![
            Value::Text(entry.id.as_str()),
            nullable_text(entry.sync_id.as_ref().map(SyncId::as_str)),
            Value::Text(entry.content.title.clone()),
            Value::Text(entry.content.description.clone()),
            Value::Text(entry.content.color.clone()),
            nullable_text(entry.content.image_url.as_deref()),
            Value::Integer(entry.content.created.timestamp_millis()),
            Value::Integer(entry.content.edited.timestamp_millis()),
            Value::Integer(entry.content.viewed.timestamp_millis()),
        ],
    )
    .await?;
    Ok(())
}

async fn insert_pending_deletion(conn: &Connection, sync_id: &SyncId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO pending_deletions (sync_id, created_at) VALUES (?, ?)",
        vec![
            Value::Text(sync_id.to_string()),
            Value::Integer(now_millis().timestamp_millis()),
        ],
    )
    .await?;
    Ok(())
}

async fn discard_entry_rows(conn: &Connection, id: &EntryId) -> Result<Option<Entry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?");
    let rows = conn.query(&sql, [id.as_str()]).await?;
    let Some(entry) = collect_entries(rows).await?.into_iter().next() else {
        return Ok(None);
    };

    conn.execute("DELETE FROM entries WHERE id = ?", [id.as_str()])
        .await?;

    if let Some(sync_id) = &entry.sync_id {
        insert_pending_deletion(conn, sync_id).await?;
        conn.execute("DELETE FROM conflicts WHERE sync_id = ?", [sync_id.as_str()])
            .await?;
    }

    Ok(Some(entry))
}

async fn collect_entries(mut rows: Rows) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    while let Some(row) = rows.next().await? {
        entries.push(parse_entry(&row)?);
    }
    Ok(entries)
}

/// Parse an entry from a row selected with `ENTRY_COLUMNS`
fn parse_entry(row: &Row) -> Result<Entry> {
    let id: String = row.get(0)?;
    let id = id
        .parse()
        .map_err(|_| Error::Database(format!("Invalid entry ID: {id}")))?;

    Ok(Entry {
        id,
        sync_id: optional_text(row, 1)?.map(SyncId::from),
        content: EntryContent {
            title: row.get(2)?,
            description: row.get(3)?,
            color: row.get(4)?,
            image_url: optional_text(row, 5)?,
            created: from_millis(row.get(6)?),
            edited: from_millis(row.get(7)?),
            viewed: from_millis(row.get(8)?),
        },
    })
}

fn parse_journal_record(row: &Row) -> Result<JournalRecord> {
    let action: String = row.get(1)?;
    let status: String = row.get(2)?;
    let affected: i64 = row.get(3)?;

    Ok(JournalRecord {
        recorded_at: from_millis(row.get(0)?),
        action: action.parse().map_err(Error::Database)?,
        status: status.parse().map_err(Error::Database)?,
        affected: u32::try_from(affected).unwrap_or(u32::MAX),
    })
}

fn optional_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!(
            "Expected text in column {idx}, found {other:?}"
        ))),
    }
}

fn nullable_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}
