//! Vault configuration loaded from `taskvault.toml`.

use crate::core::error::VaultError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "taskvault.toml";
pub const DEFAULT_SECRET_ENV: &str = "TASKVAULT_SECRET";

/// Missing fields fall back to [`VaultConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VaultConfig {
    /// Storage root; one subdirectory per initiative.
    pub root_dir: PathBuf,
    /// Environment variable holding the signing secret.
    pub secret_env: String,
    /// File holding the signing secret. Wins over `secret_env` when set.
    pub secret_file: Option<PathBuf>,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(".taskvault"),
            secret_env: DEFAULT_SECRET_ENV.to_string(),
            secret_file: None,
            log_filter: "warn".to_string(),
        }
    }
}

impl VaultConfig {
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(VaultError::ConfigError("root_dir must not be empty".into()));
        }
        if self.secret_env.trim().is_empty() {
            return Err(VaultError::ConfigError(
                "secret_env must name an environment variable".into(),
            ));
        }
        Ok(())
    }

    /// Reads the signing secret. The value is returned to the caller only;
    /// it is never logged or written back.
    pub fn resolve_secret(&self) -> Result<Vec<u8>, VaultError> {
        let secret = match &self.secret_file {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    VaultError::ConfigError(format!(
                        "cannot read secret_file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                raw.trim_end_matches(['\r', '\n']).to_string()
            }
            None => env::var(&self.secret_env)?,
        };
        if secret.is_empty() {
            return Err(VaultError::ConfigError("signing secret is empty".into()));
        }
        Ok(secret.into_bytes())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `VaultConfig::default()`.
pub fn load_config(path: &Path) -> Result<VaultConfig, VaultError> {
    if !path.exists() {
        return Ok(VaultConfig::default());
    }
    let content = fs::read_to_string(path).map_err(VaultError::IoError)?;
    let config: VaultConfig = toml::from_str(&content)
        .map_err(|e| VaultError::ConfigError(format!("{}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}
