//! Paths of the file triplet backing one cache.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Default suffix of the write staging file
pub const DEFAULT_TEMP_SUFFIX: &str = ".tmp";

/// Default suffix of the last known-good generation
pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";

/// Primary, temp and backup paths for one cache file.
///
/// Suffixes are appended to the full file name, so `cache.json` stages to
/// `cache.json.tmp` and backs up to `cache.json.bak`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    primary: PathBuf,
    temp: PathBuf,
    backup: PathBuf,
}

impl FileLayout {
    /// Layout with the default `.tmp` and `.bak` suffixes
    #[must_use]
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        Self::with_suffixes(primary, DEFAULT_TEMP_SUFFIX, DEFAULT_BACKUP_SUFFIX)
    }

    /// Layout with custom suffixes
    #[must_use]
    pub fn with_suffixes(primary: impl Into<PathBuf>, temp_suffix: &str, backup_suffix: &str) -> Self {
        let primary = primary.into();
        let temp = append_suffix(&primary, temp_suffix);
        let backup = append_suffix(&primary, backup_suffix);
        Self {
            primary,
            temp,
            backup,
        }
    }

    /// The authoritative cache file
    #[must_use]
    pub fn primary(&self) -> &Path {
        &self.primary
    }

    /// Staging file for the generation being written
    #[must_use]
    pub fn temp(&self) -> &Path {
        &self.temp
    }

    /// Copy of the previous generation
    #[must_use]
    pub fn backup(&self) -> &Path {
        &self.backup
    }

    /// Directory holding all three files, if the primary has one
    #[must_use]
    pub fn parent(&self) -> Option<&Path> {
        self.primary
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
