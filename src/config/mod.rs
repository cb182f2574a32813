//! Configuration management for kobuild

pub mod options;
pub mod schema;

pub use options::BuildOptions;
pub use schema::{BuildConfig, ProjectConfig, RegistryConfig};

use crate::error::{KoError, KoResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Project configuration file name
pub const CONFIG_FILE: &str = ".ko.toml";

/// Explicit configuration location (file, or directory holding `.ko.toml`)
pub const CONFIG_PATH_ENV: &str = "KO_CONFIG_PATH";

/// Overrides `default_base_image` from the configuration file
pub const DEFAULT_BASE_IMAGE_ENV: &str = "KO_DEFAULTBASEIMAGE";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Config manager for a working directory, honoring `KO_CONFIG_PATH`
    pub fn for_working_dir(working_dir: &Path) -> Self {
        let config_path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(explicit) if !explicit.is_empty() => {
                let explicit = PathBuf::from(explicit);
                if explicit.is_dir() {
                    explicit.join(CONFIG_FILE)
                } else {
                    explicit
                }
            }
            _ => working_dir.join(CONFIG_FILE),
        };
        Self { config_path }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Load configuration, using defaults when the file does not exist
    pub async fn load(&self) -> KoResult<ProjectConfig> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!(
                "Config file {} not found, using defaults",
                self.config_path.display()
            );
            ProjectConfig::default()
        };

        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> KoResult<ProjectConfig> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| KoError::io(format!("reading config from {}", path.display()), e))?;

        let config: ProjectConfig =
            toml::from_str(&content).map_err(|e| KoError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        debug!(
            "Loaded {} build config(s) from {}",
            config.builds.len(),
            path.display()
        );
        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

/// Apply environment overrides on top of file configuration
pub fn apply_env_overrides(config: &mut ProjectConfig) {
    if let Ok(image) = std::env::var(DEFAULT_BASE_IMAGE_ENV) {
        if !image.trim().is_empty() {
            debug!("Default base image overridden by {}", DEFAULT_BASE_IMAGE_ENV);
            config.default_base_image = Some(image.trim().to_string());
        }
    }
}
