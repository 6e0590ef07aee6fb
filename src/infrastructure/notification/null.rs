//! No-op notification adapter

use async_trait::async_trait;

use crate::application::ports::{Notification, NotificationError, Notifier};

/// No-op notifier that drops every notification
///
/// Used when desktop notifications are disabled.
pub struct NullNotifier;

impl NullNotifier {
    /// Create a new no-op notifier
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _notification: &Notification) -> Result<(), NotificationError> {
        // Do nothing
        Ok(())
    }
}
