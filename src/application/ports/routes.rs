//! Input route enumeration port interface

use thiserror::Error;

use crate::domain::input::InputPort;

/// Route enumeration errors
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    #[error("Failed to enumerate input devices: {0}")]
    EnumerationFailed(String),
}

/// Port for discovering and selecting audio inputs.
pub trait InputRoutes: Send + Sync {
    /// Inputs currently usable for capture
    fn available_inputs(&self) -> Result<Vec<InputPort>, RouteError>;

    /// The input the engine last selected, if any
    fn selected(&self) -> Option<InputPort>;

    /// Remember `port` as the input for subsequent segment opens.
    fn select(&self, port: &InputPort);
}
