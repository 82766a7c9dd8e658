use std::path::{Path, PathBuf};
use std::{env, fs};

use presence_core::EngineConfig;

use crate::error::{Result, StoreError};

pub const DB_FILE: &str = "presence.db";

/// `PRESENCE_DATA_DIR`, else `~/.presence`.
pub fn default_data_dir() -> PathBuf {
    env::var_os("PRESENCE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs_home().join(".presence"))
}

pub fn default_db_path() -> PathBuf {
    default_data_dir().join(DB_FILE)
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load and validate engine configuration.
///
/// `None`, or a path that does not exist, yields the defaults. Sections and
/// keys left out of the file keep their default values.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(p) if p.exists() => {
            let text = fs::read_to_string(p).map_err(|e| {
                StoreError::Config(format!("failed to read {}: {e}", p.display()))
            })?;
            parse_config(&text)?
        }
        _ => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

pub fn parse_config(text: &str) -> Result<EngineConfig> {
    toml::from_str(text).map_err(|e| StoreError::Config(format!("invalid TOML: {e}")))
}
