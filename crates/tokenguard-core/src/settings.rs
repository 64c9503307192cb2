//! Application settings management
//!
//! Stores non-sensitive configuration in a plain JSON file next to the
//! restriction data.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Settings file version
    pub version: u32,
    /// Log filter used when `RUST_LOG` is not set (e.g. "info", "tokenguard_core=debug")
    pub log_filter: String,
    /// Whether newly issued tokens start with the open policy
    pub open_policy_on_issue: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            log_filter: "info".to_string(),
            open_policy_on_issue: true,
        }
    }
}

/// Settings manager
pub struct SettingsManager {
    settings_file: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    /// Load settings from `storage_dir`
    ///
    /// A missing file gives the defaults. A file that exists but cannot be
    /// read or parsed is an error, so a typo never silently resets settings.
    pub fn load(storage_dir: &Path) -> Result<Self> {
        let settings_file = storage_dir.join("settings.json");
        let settings = Self::load_from_file(&settings_file)?;

        Ok(Self {
            settings_file,
            settings,
        })
    }

    /// Load settings from file
    fn load_from_file(path: &Path) -> Result<Settings> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub async fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.settings)?;

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.settings_file).await?;

        debug!("Saved settings to {:?}", self.settings_file);
        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Path of the settings file
    pub fn path(&self) -> &Path {
        &self.settings_file
    }

    /// Update settings and save
    ///
    /// The in-memory settings are left unchanged if the save fails.
    pub async fn update(&mut self, settings: Settings) -> Result<()> {
        let previous = std::mem::replace(&mut self.settings, settings);
        if let Err(e) = self.save().await {
            self.settings = previous;
            return Err(e);
        }
        Ok(())
    }
}
