//! Application Configuration Module
//!
//! Every threshold, TTL and upstream setting is an operator-tunable TOML
//! value with a built-in default.
//!
//! ## Loading Order
//!
//! 1. `STORMSLIDE_CONFIG` environment variable (path to TOML file)
//! 2. `stormslide.toml` in the current working directory
//! 3. Built-in defaults (the reference values in [`defaults`])
//!
//! Unknown keys and suspicious values are logged as warnings at load time
//! (see [`validation`]); hard errors reject the file.
//!
//! The loaded `AppConfig` is passed explicitly to the components that need
//! it; there is no global configuration.

mod app_config;
pub mod defaults;
pub mod validation;

pub use app_config::*;
