//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Execute statements inside a single transaction, rolling back on the first failure
async fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

/// Migration to version 1: entries and sync bookkeeping
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // Entries; sync_id is NULL until the entry has been pushed
            "CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                sync_id TEXT UNIQUE,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                color TEXT NOT NULL,
                image_url TEXT,
                created_at INTEGER NOT NULL,
                edited_at INTEGER NOT NULL,
                viewed_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_entries_edited ON entries(edited_at DESC)",
            // Remote deletions not yet confirmed
            "CREATE TABLE IF NOT EXISTS pending_deletions (
                sync_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )",
            // Entries awaiting manual conflict resolution
            "CREATE TABLE IF NOT EXISTS conflicts (
                sync_id TEXT PRIMARY KEY,
                detected_at INTEGER NOT NULL
            )",
            // Settings table (local only)
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            // Record migration version
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: append-only sync journal
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS journal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at INTEGER NOT NULL,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                affected INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_journal_recorded_at ON journal(recorded_at DESC)",
            // Journal rows are write-once; only bulk DELETE is allowed
            "CREATE TRIGGER IF NOT EXISTS journal_immutable BEFORE UPDATE ON journal
             BEGIN
                 SELECT RAISE(ABORT, 'journal records are immutable');
             END",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
