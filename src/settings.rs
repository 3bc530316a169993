//! Persisted per-user settings and API base resolution.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_API_BASE: &str = "https://excelwizpro-finalapi.onrender.com";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

/// JSON file holding [`UserSettings`].
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.formula-context/settings.json`, or the working directory without a home.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".formula-context"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the settings; a missing or unreadable file yields defaults.
    pub fn load(&self) -> UserSettings {
        if !self.path.exists() {
            return UserSettings::default();
        }
        match fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|contents| serde_json::from_str(&contents).map_err(anyhow::Error::from))
        {
            Ok(settings) => settings,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "ignoring unreadable settings file");
                UserSettings::default()
            }
        }
    }

    pub fn save(&self, settings: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create settings directory {:?}", parent))?;
        }
        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, contents)
            .with_context(|| format!("failed to write settings file {:?}", self.path))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.trim_end_matches('/').to_string())
}

/// Explicit override, then the persisted setting, then the built-in default.
pub fn resolve_api_base(override_base: Option<&str>, store: &SettingsStore) -> String {
    non_empty(override_base)
        .or_else(|| non_empty(store.load().api_base.as_deref()))
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

/// Persists a new API base; blank resets to the default. Returns the value in effect.
///
/// Failing to persist is logged; the returned value still applies to this process.
pub fn set_api_base(store: &SettingsStore, value: Option<&str>) -> String {
    let api_base = non_empty(value).unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let mut settings = store.load();
    settings.api_base = Some(api_base.clone());
    match store.save(&settings) {
        Ok(()) => info!(api_base = %api_base, "API base saved"),
        Err(error) => warn!(%error, "failed to persist API base"),
    }
    api_base
}
