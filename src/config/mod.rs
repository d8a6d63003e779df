//! Command line and configuration file handling

pub mod args;
mod file;

pub use args::{Args, Command};
pub use file::{AppConfig, ConfigError};
