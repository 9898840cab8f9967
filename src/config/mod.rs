//! Configuration module for the RPC daemon.
//!
//! Handles loading and validating daemon configuration from TOML files.

mod settings;

pub use settings::*;
