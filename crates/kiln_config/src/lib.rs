//! Parsing and validation of `kiln.toml` configuration files.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`KilnConfig`] with simulation, waveform, and export settings. Every table
//! and field is optional; omitted values take the documented defaults.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_file, load_config_from_str, CONFIG_FILE};
pub use types::*;
