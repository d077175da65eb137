use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SettingsError;

const SETTINGS_FILE: &str = "EditorSettings.stkforge";

/// Editor preferences persisted between sessions.
///
/// Stored as indented JSON with PascalCase keys. Missing keys load as empty
/// strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EditorSettings {
    pub engine_host_exe_path: String,
    pub last_project_path: String,
    pub last_project_folder: String,
}

impl EditorSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&json).map_err(|source| SettingsError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "loaded editor settings");
        Ok(settings)
    }

    /// Write the settings, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)?;
        debug!(?path, "saved editor settings");
        Ok(())
    }

    /// Make sure a settings file exists at `path`, writing defaults if not.
    pub fn ensure_default(path: &Path) -> Result<(), SettingsError> {
        if path.is_file() {
            return Ok(());
        }
        info!(?path, "creating default editor settings");
        Self::default().save(path)
    }

    /// [`ensure_default`](Self::ensure_default) then [`load`](Self::load).
    pub fn load_or_create(path: &Path) -> Result<Self, SettingsError> {
        Self::ensure_default(path)?;
        Self::load(path)
    }

    /// The configured engine executable, if one is set.
    pub fn engine_path(&self) -> Option<PathBuf> {
        let trimmed = self.engine_host_exe_path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

/// `<local data dir>/Stakeforge/Editor/EditorSettings.stkforge`.
///
/// The local data dir is `%LOCALAPPDATA%` on windows and `$XDG_DATA_HOME`
/// (falling back to `~/.local/share`) elsewhere. `None` when neither can be
/// determined.
pub fn default_settings_path() -> Option<PathBuf> {
    local_data_dir().map(|dir| dir.join("Stakeforge").join("Editor").join(SETTINGS_FILE))
}

#[cfg(windows)]
fn local_data_dir() -> Option<PathBuf> {
    std::env::var_os("LOCALAPPDATA")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(not(windows))]
fn local_data_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    std::env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(|home| PathBuf::from(home).join(".local").join("share"))
}
