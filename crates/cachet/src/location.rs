//! Mapping a symbolic storage location to a cache file path.
//!
//! | Location | Linux | macOS | Windows |
//! |----------|-------|-------|---------|
//! | `Cache` | `~/.cache` | `~/Library/Caches` | `%LOCALAPPDATA%` |
//! | `State` | `~/.local/state` | `~/Library/Application Support` | `%APPDATA%` |
//! | `Data` | `~/.local/share` | `~/Library/Application Support` | `%APPDATA%` |
//! | `Temp` | `$TMPDIR` | `$TMPDIR` | `%TEMP%` |
//!
//! The application name and optional subdirectory are appended to the base.
//! `CACHET_DIR` replaces the base of every symbolic location, which keeps
//! tests and CI away from the real home directory.

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Environment variable overriding the base directory of symbolic locations
pub const DIR_OVERRIDE_ENV: &str = "CACHET_DIR";

/// Where a cache file should live
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StorageLocation {
    /// Platform cache directory (safe to delete)
    #[default]
    Cache,
    /// Platform state directory
    State,
    /// Platform data directory
    Data,
    /// System temp directory
    Temp,
    /// An explicit directory; never affected by the override
    Custom(PathBuf),
}

/// Inputs for resolving a location's base directory
#[derive(Debug, Clone)]
pub struct LocationInputs {
    /// Value of `CACHET_DIR`
    pub dir_override: Option<PathBuf>,
    /// Platform cache directory
    pub cache_dir: Option<PathBuf>,
    /// Platform state directory
    pub state_dir: Option<PathBuf>,
    /// Platform data directory
    pub data_dir: Option<PathBuf>,
    /// System temp directory
    pub temp_dir: PathBuf,
}

impl LocationInputs {
    /// Read inputs from the environment and the `dirs` crate
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            dir_override: std::env::var_os(DIR_OVERRIDE_ENV).map(PathBuf::from),
            cache_dir: dirs::cache_dir(),
            // state_dir() is Linux-only; elsewhere state lives with data.
            state_dir: dirs::state_dir().or_else(dirs::data_dir),
            data_dir: dirs::data_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Base directory for `location`, before the app name is appended
pub fn base_dir(location: &StorageLocation, inputs: &LocationInputs) -> Result<PathBuf> {
    if let StorageLocation::Custom(dir) = location {
        return Ok(dir.clone());
    }
    if let Some(dir) = inputs
        .dir_override
        .as_ref()
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        return Ok(dir.clone());
    }

    let resolved = match location {
        StorageLocation::Cache => inputs.cache_dir.clone(),
        StorageLocation::State => inputs.state_dir.clone(),
        StorageLocation::Data => inputs.data_dir.clone(),
        StorageLocation::Temp => Some(inputs.temp_dir.clone()),
        StorageLocation::Custom(_) => None,
    };
    resolved.ok_or_else(|| {
        Error::configuration(format!("Could not determine the {location:?} directory"))
    })
}

/// Resolve the full path of a cache file without touching the filesystem
pub fn cache_file_path(
    location: &StorageLocation,
    app_name: &str,
    file_name: &str,
    subdirectory: Option<&str>,
    inputs: &LocationInputs,
) -> Result<PathBuf> {
    validate_segment("application name", app_name)?;
    validate_segment("file name", file_name)?;
    if let Some(sub) = subdirectory {
        validate_relative("subdirectory", sub)?;
    }

    let mut path = base_dir(location, inputs)?;
    if !matches!(location, StorageLocation::Custom(_)) {
        path.push(app_name);
    }
    if let Some(sub) = subdirectory {
        path.push(sub);
    }
    path.push(file_name);
    Ok(path)
}

/// Resolve the cache file path from the environment and create its directory
pub fn resolve_cache_file(
    location: &StorageLocation,
    app_name: &str,
    file_name: &str,
    subdirectory: Option<&str>,
) -> Result<PathBuf> {
    let path = cache_file_path(
        location,
        app_name,
        file_name,
        subdirectory,
        &LocationInputs::from_env(),
    )?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::Store(cachet_store::Error::io(e, parent, "create_dir_all"))
        })?;
    }
    Ok(path)
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(Error::configuration(format!(
            "Invalid {what} `{value}`: expected a single path segment"
        ))),
    }
}

fn validate_relative(what: &str, value: &str) -> Result<()> {
    let path = Path::new(value);
    let all_normal = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if value.is_empty() || !all_normal {
        return Err(Error::configuration(format!(
            "Invalid {what} `{value}`: expected a relative path without `..`"
        )));
    }
    Ok(())
}
