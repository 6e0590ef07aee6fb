//! Infrastructure layer - Adapter implementations
//!
//! Contains concrete implementations of the port interfaces,
//! integrating with cpal, the filesystem, and the desktop.

pub mod capture;
pub mod config;
pub mod notification;
pub mod probe;
pub mod segment;

// Re-export adapters
pub use capture::{create_capture, CpalCapture, CpalRoutes};
pub use config::{create_config_store, XdgConfigStore};
pub use notification::{create_notifier, NotifyRustNotifier, NullNotifier};
pub use probe::SystemProbe;
pub use segment::WavSegmentStore;
