//! # dolt-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`DoltSettings::default()`]
//! 2. **User file**: `~/.dolt/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `DOLT_*` overrides (highest priority)
//!
//! The merged result is validated before use: a lane policy whose target
//! exceeds its soft threshold fails the load.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, dolt_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<DoltSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.dolt/settings.json` with env var
/// overrides. If loading or validation fails, logs the error and returns
/// compiled defaults.
pub fn get_settings() -> &'static DoltSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            DoltSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: DoltSettings) -> std::result::Result<(), DoltSettings> {
    SETTINGS.set(settings)
}
