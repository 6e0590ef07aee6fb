//! Notification port interface

use async_trait::async_trait;
use thiserror::Error;

/// Notification errors
#[derive(Debug, Clone, Error)]
pub enum NotificationError {
    #[error("Failed to show notification: {0}")]
    SendFailed(String),
}

/// Notification urgency, mapped to the platform's own levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationUrgency {
    Normal,
    /// Demands attention, e.g. a resume prompt on a deadline
    Critical,
}

/// Notification icon types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationIcon {
    Info,
    Success,
    Warning,
    Error,
    Recording,
}

impl NotificationIcon {
    /// Get the freedesktop icon name
    pub const fn icon_name(&self) -> &'static str {
        match self {
            Self::Info => "dialog-information",
            Self::Success => "dialog-ok",
            Self::Warning => "dialog-warning",
            Self::Error => "dialog-error",
            Self::Recording => "audio-input-microphone",
        }
    }
}

/// A user-facing notification.
///
/// `id` names the notification slot: a later notification with the
/// same id replaces the earlier one instead of stacking, so repeated
/// warnings do not pile up.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: &'static str,
    pub title: String,
    pub body: String,
    pub icon: NotificationIcon,
    pub urgency: NotificationUrgency,
}

impl Notification {
    pub fn new(id: &'static str, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            icon: NotificationIcon::Info,
            urgency: NotificationUrgency::Normal,
        }
    }

    pub fn icon(mut self, icon: NotificationIcon) -> Self {
        self.icon = icon;
        self
    }

    pub fn critical(mut self) -> Self {
        self.urgency = NotificationUrgency::Critical;
        self
    }
}

/// Port for desktop notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show a notification.
    ///
    /// # Returns
    /// Ok(()) on success, error otherwise
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Blanket implementation for boxed notifier types
#[async_trait]
impl Notifier for Box<dyn Notifier> {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.as_ref().notify(notification).await
    }
}
