//! # asknow-settings
//!
//! Configuration for the AskNow realtime server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AskNowSettings::default()`]
//! 2. **User file**: `~/.asknow/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ASKNOW_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
