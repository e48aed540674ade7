//! Path utilities for Folio data directories.

use std::path::{Path, PathBuf};

/// Get the default Folio data directory (~/.folio/).
///
/// Falls back to `.folio` in the working directory when there is no home.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".folio"))
        .unwrap_or_else(|| PathBuf::from(".folio"))
}

/// Get the preferences file inside a data directory.
pub fn preferences_path(data_dir: &Path) -> PathBuf {
    data_dir.join("preferences.json")
}

/// Get the directory holding the curated evaluation sets.
pub fn eval_sets_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("eval")
}

/// Get the directory evaluation reports are written under.
pub fn eval_reports_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("eval-reports")
}
