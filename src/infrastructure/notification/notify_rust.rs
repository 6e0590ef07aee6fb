//! Cross-platform notification adapter using notify-rust
//!
//! Works on Windows, macOS, and Linux. On Linux the adapter keeps the
//! platform id of each notification slot so a repeated warning replaces
//! the one already on screen instead of stacking a new popup.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::ports::{
    Notification, NotificationError, NotificationUrgency, Notifier,
};

/// Cross-platform notifier using notify-rust
pub struct NotifyRustNotifier {
    /// Application name for notifications
    app_name: String,
    /// Slot name to platform notification id, for in-place replacement
    slots: Mutex<HashMap<&'static str, u32>>,
}

impl NotifyRustNotifier {
    /// Create a new notify-rust notifier
    pub fn new() -> Self {
        Self {
            app_name: "Continuo".to_string(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Create with custom app name
    pub fn with_app_name(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for NotifyRustNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for NotifyRustNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        let app_name = self.app_name.clone();
        let title = notification.title.clone();
        let body = notification.body.clone();
        let icon_name = notification.icon.icon_name().to_string();
        let critical = notification.urgency == NotificationUrgency::Critical;
        let slot = notification.id;
        let replaces = self.slots.lock().unwrap().get(slot).copied();

        // notify-rust operations can block, so run in spawn_blocking
        let shown = tokio::task::spawn_blocking(move || {
            let mut builder = notify_rust::Notification::new();
            builder
                .appname(&app_name)
                .summary(&title)
                .body(&body)
                .icon(&icon_name);
            show_sync(&mut builder, replaces, critical)
        })
        .await
        .map_err(|e| NotificationError::SendFailed(format!("Task join error: {}", e)))??;

        if let Some(id) = shown {
            self.slots.lock().unwrap().insert(slot, id);
        }
        Ok(())
    }
}

/// Show the notification, returning the platform id when the server
/// assigns one.
#[cfg(all(unix, not(target_os = "macos")))]
fn show_sync(
    builder: &mut notify_rust::Notification,
    replaces: Option<u32>,
    critical: bool,
) -> Result<Option<u32>, NotificationError> {
    if let Some(id) = replaces {
        builder.id(id);
    }
    if critical {
        builder.urgency(notify_rust::Urgency::Critical);
    }
    builder
        .show()
        .map(|handle| Some(handle.id()))
        .map_err(|e| NotificationError::SendFailed(e.to_string()))
}

/// Show the notification. macOS and Windows assign no replacement ids
/// and have no urgency levels, so those fields are dropped.
#[cfg(any(not(unix), target_os = "macos"))]
fn show_sync(
    builder: &mut notify_rust::Notification,
    _replaces: Option<u32>,
    _critical: bool,
) -> Result<Option<u32>, NotificationError> {
    builder
        .show()
        .map(|_| None)
        .map_err(|e| NotificationError::SendFailed(e.to_string()))
}
