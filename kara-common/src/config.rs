//! Configuration file location and loading
//!
//! Settings resolve in priority order:
//! 1. Command-line argument or environment variable (handled by clap)
//! 2. TOML config file
//! 3. Compiled default
//!
//! A missing config file is never an error; a malformed one is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name under the platform config dir
pub const CONFIG_DIR_NAME: &str = "kara";

/// Config file name inside [`CONFIG_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Platform default config file path (`~/.config/kara/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Pick the config file to load
///
/// An explicit path is returned as-is even if it does not exist, so the
/// caller can report it. The platform default is only returned if present.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    default_config_path().filter(|path| path.exists())
}

/// Load a TOML config file into `T`
///
/// `None` or a path that does not exist yields `T::default()` with a
/// warning. Unreadable or malformed files are errors.
pub fn load_toml_file<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve a path setting: override, then config file value, then default
///
/// Relative config-file paths are taken relative to `base`.
pub fn resolve_path(
    cli_or_env: Option<PathBuf>,
    from_file: Option<&Path>,
    base: &Path,
    default: impl FnOnce() -> PathBuf,
) -> PathBuf {
    if let Some(path) = cli_or_env {
        return path;
    }
    match from_file {
        Some(path) if path.is_relative() => base.join(path),
        Some(path) => path.to_path_buf(),
        None => default(),
    }
}
