//! Configuration module for the Realm server
//!
//! Handles locating, creating and parsing the TOML configuration file.

pub mod settings;

pub use settings::{Config, DatabaseSettings, MapSettings, NotificationSettings, ServerSettings};

use crate::error::StageError;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Path of the distributed template that sits next to `path`.
///
/// # Arguments
///
/// * `path` - Location of the live configuration file
///
/// # Returns
///
/// `path` with `.dist` appended to its file name.
///
/// # Examples
///
/// ```rust
/// use realm_bootstrap::config::dist_path;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(
///     dist_path(Path::new("conf/config.toml")),
///     PathBuf::from("conf/config.toml.dist")
/// );
/// ```
pub fn dist_path(path: &Path) -> PathBuf {
    let mut dist = OsString::from(path.as_os_str());
    dist.push(".dist");
    PathBuf::from(dist)
}

/// Load configuration from file, creating it first if it does not exist.
///
/// A missing file is copied from its `.dist` template when one exists,
/// otherwise the defaults are written out.
///
/// # Arguments
///
/// * `path` - Location of the TOML configuration file
///
/// # Returns
///
/// The parsed and validated [`Config`]. Sections and keys absent from the
/// file take their default values.
///
/// # Errors
///
/// * Returns a configuration error if file I/O fails
/// * Returns a configuration error if TOML parsing or validation fails
///
/// # Examples
///
/// ```rust,no_run
/// use realm_bootstrap::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("config.toml"))?;
/// println!("{} listens on {}", config.server.name, config.server.game_port);
/// # Ok::<(), realm_bootstrap::StageError>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config, StageError> {
    if !path.exists() {
        create_config(path)?;
    }

    let content = fs::read_to_string(path).map_err(|e| {
        StageError::Configuration(format!("failed to read {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| {
        warn!("Failed to parse config file {}: {}", path.display(), e);
        StageError::Configuration(format!("failed to parse {}: {}", path.display(), e))
    })?;

    config.validate().map_err(StageError::Configuration)?;
    Ok(config)
}

fn create_config(path: &Path) -> Result<(), StageError> {
    let dist = dist_path(path);
    if dist.exists() {
        info!("Copying {} to {}", dist.display(), path.display());
        fs::copy(&dist, path).map_err(|e| {
            StageError::Configuration(format!("failed to copy {}: {}", dist.display(), e))
        })?;
        return Ok(());
    }

    warn!("Configuration file not found: {}, using defaults", path.display());
    let content = toml::to_string_pretty(&Config::default())
        .map_err(|e| StageError::Configuration(format!("failed to serialize defaults: {}", e)))?;
    fs::write(path, content).map_err(|e| {
        StageError::Configuration(format!("failed to write {}: {}", path.display(), e))
    })?;
    info!("Created default configuration file: {}", path.display());
    Ok(())
}
