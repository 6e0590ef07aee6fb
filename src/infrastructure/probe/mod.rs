//! Resource probing infrastructure module

mod system;

pub use system::SystemProbe;
