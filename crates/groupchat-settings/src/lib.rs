//! # groupchat-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GroupchatSettings::default()`]
//! 2. **User file**: `~/.groupchat/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `GROUPCHAT_*` and `JWT_SECRET` (highest priority)
//!
//! Command-line flags are applied by the binary on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, data_dir, deep_merge, load_settings_from_path, settings_path,
};
pub use types::*;
