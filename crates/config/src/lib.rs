//! Configuration module for the subframe monitor
//!
//! Handles loading configuration from TOML files, environment variable overrides,
//! persisting the configuration on exit and validating operator settings.

pub mod config;

pub use config::*;
