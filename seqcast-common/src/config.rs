//! Configuration file discovery and playlist folder resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the playlist folder
pub const PLAYLIST_FOLDER_ENV: &str = "SEQCAST_PLAYLIST_FOLDER";

/// Key holding the playlist folder in the TOML config file
const PLAYLIST_FOLDER_KEY: &str = "playlist_folder";

/// Playlist folder resolution, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file (`playlist_folder` key)
///
/// Unlike a data root there is no sensible compiled default for the folder
/// to play, so `Ok(None)` is returned when no source names one.
pub fn resolve_playlist_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_file: Option<&Path>,
) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(Some(path.to_path_buf()));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Ok(Some(PathBuf::from(path)));
        }
    }

    // Priority 3: TOML config file
    let config_path = match config_file {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file().ok(),
    };

    if let Some(config_path) = config_path {
        let content = std::fs::read_to_string(&config_path)?;
        let value = toml::from_str::<toml::Value>(&content)?;
        if let Some(folder) = value.get(PLAYLIST_FOLDER_KEY).and_then(|v| v.as_str()) {
            return Ok(Some(PathBuf::from(folder)));
        }
    }

    Ok(None)
}

/// Get the configuration file path for the platform
///
/// On Linux `~/.config/seqcast/config.toml` is tried first, then
/// `/etc/seqcast/config.toml`.
pub fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        let user_config = dirs::config_dir().map(|d| d.join("seqcast").join("config.toml"));
        let system_config = PathBuf::from("/etc/seqcast/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let config_path = dirs::config_dir()
        .map(|d| d.join("seqcast").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", config_path)))
    }
}

/// Read a config file into a string, mapping a missing file to `Error::NotFound`
pub fn read_config_file(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(format!("config file {}", path.display())))
        }
        Err(e) => Err(Error::Io(e)),
    }
}
