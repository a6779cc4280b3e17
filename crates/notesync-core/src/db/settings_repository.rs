//! Per-user settings repository

use std::future::Future;

use crate::error::{Error, Result};
use crate::models::SyncSettings;

use super::LibSqlStore;

const WIFI_ONLY: &str = "wifi_only";
const PENDING_SYNC: &str = "pending_sync";
const PROGRESS_NOTIFICATION_DELAY_MS: &str = "progress_notification_delay_ms";

/// Trait for per-user sync settings storage
pub trait SettingsRepository: Send + Sync {
    /// Load settings for a user, falling back to defaults for unset keys
    fn load_sync_settings(&self, user_id: &str)
        -> impl Future<Output = Result<SyncSettings>> + Send;

    /// Save the user-editable settings.
    ///
    /// `pending_sync` is left untouched; only `set_pending_sync` writes it.
    fn save_sync_settings(
        &self,
        user_id: &str,
        settings: &SyncSettings,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Persist only the pending-sync flag
    fn set_pending_sync(&self, user_id: &str, pending: bool)
        -> impl Future<Output = Result<()>> + Send;
}

impl SettingsRepository for LibSqlStore {
    async fn load_sync_settings(&self, user_id: &str) -> Result<SyncSettings> {
        let mut settings = SyncSettings::default();

        if let Some(value) = self.get_setting(user_id, WIFI_ONLY).await? {
            settings.wifi_only = parse_flag(&value);
        }

        if let Some(value) = self.get_setting(user_id, PENDING_SYNC).await? {
            settings.pending_sync = parse_flag(&value);
        }

        if let Some(value) = self
            .get_setting(user_id, PROGRESS_NOTIFICATION_DELAY_MS)
            .await?
        {
            if let Ok(delay) = value.trim().parse() {
                settings.progress_notification_delay_ms = delay;
            }
        }

        Ok(settings)
    }

    async fn save_sync_settings(&self, user_id: &str, settings: &SyncSettings) -> Result<()> {
        self.set_setting(user_id, WIFI_ONLY, flag(settings.wifi_only))
            .await?;
        self.set_setting(
            user_id,
            PROGRESS_NOTIFICATION_DELAY_MS,
            &settings.progress_notification_delay_ms.to_string(),
        )
        .await?;
        Ok(())
    }

    async fn set_pending_sync(&self, user_id: &str, pending: bool) -> Result<()> {
        self.set_setting(user_id, PENDING_SYNC, flag(pending)).await
    }
}

impl LibSqlStore {
    async fn get_setting(&self, user_id: &str, key: &str) -> Result<Option<String>> {
        let db = self.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT value FROM settings WHERE key = ?",
                [scoped_key(user_id, key)?],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_setting(&self, user_id: &str, key: &str, value: &str) -> Result<()> {
        let db = self.lock().await;
        db.connection()
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [scoped_key(user_id, key)?, value.to_string()],
            )
            .await?;
        Ok(())
    }
}

/// Settings are namespaced per user as `<user>/<key>`
fn scoped_key(user_id: &str, key: &str) -> Result<String> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(Error::InvalidInput("user id must not be empty".into()));
    }
    Ok(format!("{user_id}/{key}"))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

const fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> LibSqlStore {
        LibSqlStore::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_default_settings() {
        let store = setup().await;

        let settings = store.load_sync_settings("alice").await.unwrap();
        assert_eq!(settings, SyncSettings::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_load_settings() {
        let store = setup().await;

        let settings = SyncSettings {
            wifi_only: true,
            pending_sync: false,
            progress_notification_delay_ms: 250,
        };
        store.save_sync_settings("alice", &settings).await.unwrap();

        let loaded = store.load_sync_settings("alice").await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_keeps_pending_sync() {
        let store = setup().await;

        let stale = store.load_sync_settings("alice").await.unwrap();
        store.set_pending_sync("alice", true).await.unwrap();

        store
            .save_sync_settings(
                "alice",
                &SyncSettings {
                    wifi_only: true,
                    ..stale
                },
            )
            .await
            .unwrap();

        let loaded = store.load_sync_settings("alice").await.unwrap();
        assert!(loaded.wifi_only);
        assert!(loaded.pending_sync);

        store
            .save_sync_settings(
                "alice",
                &SyncSettings {
                    pending_sync: false,
                    ..loaded
                },
            )
            .await
            .unwrap();
        assert!(store.load_sync_settings("alice").await.unwrap().pending_sync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settings_are_per_user() {
        let store = setup().await;

        store.set_pending_sync("alice", true).await.unwrap();

        assert!(store.load_sync_settings("alice").await.unwrap().pending_sync);
        assert!(!store.load_sync_settings("bob").await.unwrap().pending_sync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_user_is_rejected() {
        let store = setup().await;
        assert!(store.set_pending_sync("  ", true).await.is_err());
    }
}
