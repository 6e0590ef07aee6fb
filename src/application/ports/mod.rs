//! Port interfaces (traits) for external systems
//!
//! These traits define the boundaries between the application
//! and infrastructure layers.

pub mod capture;
pub mod config;
pub mod notifier;
pub mod probe;
pub mod routes;
pub mod sink;
pub mod store;

// Re-export common types
pub use capture::{CaptureDevice, CaptureError, SealedStats};
pub use config::ConfigStore;
pub use notifier::{Notification, NotificationError, NotificationIcon, NotificationUrgency, Notifier};
pub use probe::ResourceProbe;
pub use routes::{InputRoutes, RouteError};
pub use sink::{CompletionSink, SinkError};
pub use store::{MergeError, MergeOutcome, SegmentStore};
