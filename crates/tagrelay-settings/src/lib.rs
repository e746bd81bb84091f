//! # tagrelay-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: JSON at the path named by `CONFIG` (deep-merged over defaults)
//! 3. **Environment variables**: `WEBSOCKET_PORT`, `HTTP_PORT`, `PARENT_URL`,
//!    `TAGRELAY_*` (highest priority)
//!
//! Whether an instance is the root of the relay tree is decided once, from
//! the presence of a parent URL: see [`UplinkSettings::is_root`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path, validate,
};
pub use types::*;
