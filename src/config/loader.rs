use super::{Mode, ParmapConfig};
use crate::error::{common, ErrorCode, ParmapError, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::debug;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_VAR: &str = "PARMAP_CONFIG";

/// Location of the per-user configuration file, if a home directory exists
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "parmap", "parmap").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load defaults from `$PARMAP_CONFIG` or the per-user file, then apply
/// `PARMAP_*` environment overrides.
pub async fn load() -> Result<ParmapConfig> {
    let explicit = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);

    let mut config = match explicit {
        Some(path) => load_from(&path).await?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_from(&path).await?,
            _ => ParmapConfig::default(),
        },
    };

    config.merge_env_vars()?;
    Ok(config)
}

/// Load a configuration file without applying environment overrides
pub async fn load_from(path: &Path) -> Result<ParmapConfig> {
    if !path.exists() {
        return Err(common::config_not_found(path));
    }

    debug!("Loading configuration from {}", path.display());
    let content = fs::read_to_string(path).await?;
    ParmapConfig::from_toml_str(&content)
        .map_err(|e| e.with_context(format!("in {}", path.display())))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_value(key, raw)),
    }
}

fn invalid_value(key: &str, raw: &str) -> ParmapError {
    ParmapError::config_with_code(
        ErrorCode::CONFIG_INVALID_VALUE,
        format!("Invalid value '{}' for {}", raw, key),
    )
}

impl ParmapConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PARMAP_*` overrides from the process environment
    pub fn merge_env_vars(&mut self) -> Result<()> {
        self.merge_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `PARMAP_*` overrides from an arbitrary lookup
    pub fn merge_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("PARMAP_MODE") {
            self.mode = Mode::from_str(&mode)?;
        }

        if let Some(cpus) = lookup("PARMAP_CPUS") {
            let parsed = cpus
                .trim()
                .parse::<usize>()
                .map_err(|_| invalid_value("PARMAP_CPUS", &cpus))?;
            self.cpus = Some(parsed);
        }

        if let Some(level) = lookup("PARMAP_LEVEL") {
            self.level = if level.trim().is_empty() {
                None
            } else {
                Some(level.trim().to_string())
            };
        }

        if let Some(logging) = lookup("PARMAP_LOGGING") {
            self.logging = parse_bool("PARMAP_LOGGING", &logging)?;
        }

        if let Some(dir) = lookup("PARMAP_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }

        if let Some(lb) = lookup("PARMAP_LOAD_BALANCING") {
            self.load_balancing = parse_bool("PARMAP_LOAD_BALANCING", &lb)?;
        }

        if let Some(show) = lookup("PARMAP_SHOW_INFO") {
            self.show_info = parse_bool("PARMAP_SHOW_INFO", &show)?;
        }

        Ok(())
    }
}
