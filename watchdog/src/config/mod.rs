//! Configuration management for the watchdog: data types and loading of the TOML config file.
//!
//! Reloading at runtime lives in `app::config_watcher`.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
