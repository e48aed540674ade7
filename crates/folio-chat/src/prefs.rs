//! Persisted user preferences.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::paths::preferences_path;
use crate::tier::ModelTier;

/// Preference store errors.
#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredPreferences {
    #[serde(rename = "selectedModel", default, skip_serializing_if = "Option::is_none")]
    selected_model: Option<ModelTier>,
}

/// The user's manually chosen tier, kept in a JSON file.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store inside a data directory.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(preferences_path(data_dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored tier.
    ///
    /// A missing or unreadable file means no preference.
    pub fn load(&self) -> Result<Option<ModelTier>, PreferenceError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<StoredPreferences>(&content) {
            Ok(stored) => Ok(stored.selected_model),
            Err(e) => {
                warn!("Ignoring corrupt preferences at {:?}: {}", self.path, e);
                Ok(None)
            }
        }
    }

    /// Remember `tier` as the user's choice.
    pub fn save(&self, tier: ModelTier) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredPreferences {
            selected_model: Some(tier),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&stored)?)?;
        debug!("Saved preferred tier {} to {:?}", tier, self.path);
        Ok(())
    }

    /// Forget the stored tier. Succeeds when nothing is stored.
    pub fn reset(&self) -> Result<(), PreferenceError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            debug!("Removed preferences at {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_has_no_preference() {
        let dir = tempdir().unwrap();
        let store = PreferenceStore::in_dir(dir.path());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_reset() {
        let dir = tempdir().unwrap();
        let store = PreferenceStore::in_dir(&dir.path().join("nested"));

        store.save(ModelTier::Large).unwrap();
        assert_eq!(store.load().unwrap(), Some(ModelTier::Large));

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"selectedModel\": \"large\""));

        store.reset().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.reset().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = tempdir().unwrap();
        let store = PreferenceStore::in_dir(dir.path());
        fs::write(store.path(), "{not json").unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
