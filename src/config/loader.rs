// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::PersistedDefaults;
use crate::config::validate::validate_persisted;
use crate::errors::{LaunchError, Result};

/// Environment variable overriding the default config location.
pub const CONFIG_FILE_ENV: &str = "TRAINLAUNCH_CONFIG_FILE";

/// Load a persisted configuration and return it without semantic checks.
///
/// The format is picked from the extension: `.json`, `.toml`, anything else
/// is read as YAML.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<PersistedDefaults> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let parse_err = |message: String| LaunchError::Parse {
        path: path.display().to_string(),
        message,
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let config: PersistedDefaults = match ext.as_deref() {
        Some("json") => serde_json::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
        Some("toml") => toml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
        _ => serde_yaml::from_str(&contents).map_err(|e| parse_err(e.to_string()))?,
    };

    Ok(config)
}

/// Load a persisted configuration and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PersistedDefaults> {
    let config = load_from_path(&path)?;
    validate_persisted(&config)?;
    Ok(config)
}

/// Default location of the persisted configuration.
///
/// `TRAINLAUNCH_CONFIG_FILE` wins; otherwise
/// `<cache dir>/trainlaunch/default_config.yaml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return PathBuf::from(path);
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trainlaunch")
        .join("default_config.yaml")
}

/// Decide whether a persisted configuration applies and load it.
///
/// - An explicit path is always loaded; a missing file is an error.
/// - The default file is consulted only when it exists and the caller did not
///   force CPU execution.
pub fn load_persisted(explicit: Option<&Path>, force_cpu: bool) -> Result<Option<PersistedDefaults>> {
    if let Some(path) = explicit {
        debug!(path = %path.display(), "loading explicitly requested config file");
        return load_and_validate(path).map(Some);
    }

    let default_path = default_config_path();
    if force_cpu || !default_path.is_file() {
        debug!(
            path = %default_path.display(),
            force_cpu,
            "no persisted config applies"
        );
        return Ok(None);
    }

    debug!(path = %default_path.display(), "loading default config file");
    load_and_validate(default_path).map(Some)
}
