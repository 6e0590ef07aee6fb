//! Configuration infrastructure module

mod xdg;

pub use xdg::XdgConfigStore;

use crate::application::ports::ConfigStore;

/// Create the default config store
pub fn create_config_store() -> Box<dyn ConfigStore> {
    Box::new(XdgConfigStore::new())
}
