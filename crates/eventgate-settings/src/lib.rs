//! # eventgate-settings
//!
//! Layered configuration for the EventGate server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`GateSettings::default()`]
//! 2. **User file** — `~/.eventgate/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `EVENTGATE_*` overrides (highest priority)
//!
//! The global singleton is reloadable: [`reload_settings_from_path`] swaps
//! the cached value so subsequent [`get_settings`] calls return fresh data.
//!
//! # Usage
//!
//! ```no_run
//! use eventgate_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::{Arc, RwLock};

/// Global settings singleton.
///
/// `RwLock<Option<Arc<GateSettings>>>` rather than `OnceLock` so the cached
/// value can be swapped on reload. Reads are a shared lock plus `Arc::clone`.
static SETTINGS: RwLock<Option<Arc<GateSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, loads from `~/.eventgate/settings.json` with env overrides;
/// afterwards returns the cached value. Load failures fall back to compiled
/// defaults.
pub fn get_settings() -> Arc<GateSettings> {
    // Fast path: read lock
    {
        let guard = SETTINGS.read().expect("settings lock poisoned");
        if let Some(ref s) = *guard {
            return Arc::clone(s);
        }
    }

    // Slow path: first access, take write lock
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    // Double-check after acquiring write lock (another thread may have initialized)
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            GateSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Useful for tests and server
/// startup where the settings path is known.
pub fn init_settings(settings: GateSettings) {
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(Arc::new(settings));
}

/// Reload settings from a specific file path and swap the global cache.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            GateSettings::default()
        }
    });
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(new);
    tracing::info!(?path, "settings reloaded from disk");
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: the cache is process-global, and parallel tests mutating
    // it would interleave.
    #[test]
    fn global_cache_init_and_reload() {
        let mut settings = GateSettings::default();
        settings.server.port = 4242;
        init_settings(settings);
        assert_eq!(get_settings().server.port, 4242);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 5555}}"#).unwrap();
        reload_settings_from_path(&path);
        assert_eq!(get_settings().server.port, 5555);
    }
}
