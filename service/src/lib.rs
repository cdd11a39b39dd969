//! Configuration and bootstrap for the inventory command processor.
//!
//! The `inventory-cmd` binary loads a [`Config`] from the environment,
//! connects the backends through [`bootstrap::Resources`], and runs an
//! [`bootstrap::Application`] until it receives Ctrl+C or SIGTERM.

pub mod bootstrap;
pub mod config;

pub use bootstrap::{Application, Resources};
pub use config::{Config, ConfigError};
