use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;
use tracing::{debug, warn};

use foodgram_core::shopping_list::DEFAULT_SIGNATURE;

pub struct Config {
    pub db_path: PathBuf,
    pub signature: String,
}

impl Config {
    /// Resolve the database location and shopping list signature.
    ///
    /// `FOODGRAM_DB` and `FOODGRAM_SIGNATURE` override the defaults; blank
    /// values are ignored.
    pub fn load() -> Result<Self> {
        let db_path = match env_override("FOODGRAM_DB") {
            Some(path) => {
                let path = PathBuf::from(path);
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {}", parent.display())
                    })?;
                }
                path
            }
            None => default_db_path()?,
        };

        let signature =
            env_override("FOODGRAM_SIGNATURE").unwrap_or_else(|| DEFAULT_SIGNATURE.to_string());

        debug!(db = %db_path.display(), %signature, "loaded config");
        Ok(Config { db_path, signature })
    }
}

fn default_db_path() -> Result<PathBuf> {
    let proj_dirs =
        ProjectDirs::from("", "", "foodgram").context("Could not determine home directory")?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

    Ok(data_dir.join("foodgram.db"))
}

fn env_override(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Ok(_) => {
            warn!("{key} is set but empty, using default");
            None
        }
        Err(std::env::VarError::NotUnicode(_)) => {
            warn!("{key} is not valid unicode, using default");
            None
        }
        Err(std::env::VarError::NotPresent) => None,
    }
}
