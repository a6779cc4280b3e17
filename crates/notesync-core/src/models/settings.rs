//! Per-user sync settings model

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay before a running pass is announced as "in progress"
pub const DEFAULT_PROGRESS_NOTIFICATION_DELAY_MS: u64 = 1_000;

/// Persisted per-user sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Only sync over unmetered (wifi) connections
    pub wifi_only: bool,
    /// A sync was requested but deferred; resume once the network allows it
    pub pending_sync: bool,
    /// How long a pass may run before a progress event is emitted
    pub progress_notification_delay_ms: u64,
}

impl SyncSettings {
    pub const fn progress_notification_delay(&self) -> Duration {
        Duration::from_millis(self.progress_notification_delay_ms)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            wifi_only: false,
            pending_sync: false,
            progress_notification_delay_ms: DEFAULT_PROGRESS_NOTIFICATION_DELAY_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = SyncSettings::default();
        assert!(!settings.wifi_only);
        assert!(!settings.pending_sync);
        assert_eq!(
            settings.progress_notification_delay(),
            Duration::from_millis(1_000)
        );
    }
}
