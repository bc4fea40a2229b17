//! JSON Configuration Management
//!
//! Resolves, reads and writes the engine configuration file. A project-local
//! `.cascade-resolver.json` wins over the global `~/.cascade-resolver/config.json`;
//! with neither present the defaults are used and nothing is written.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::{EngineConfig, EngineConfigUpdate};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{ensure_dir, global_config_path, PROJECT_CONFIG_FILE};

/// Configuration service for engine settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: EngineConfig,
}

impl ConfigService {
    /// Load configuration for a project directory.
    pub fn for_project(project_root: &Path) -> AppResult<Self> {
        let project_path = project_root.join(PROJECT_CONFIG_FILE);
        if project_path.exists() {
            return Self::open(project_path);
        }

        let global_path = global_config_path()?;
        if global_path.exists() {
            return Self::open(global_path);
        }

        Ok(Self {
            config_path: project_path,
            config: EngineConfig::default(),
        })
    }

    /// Load configuration from an explicit file. A missing file yields
    /// defaults bound to that path.
    pub fn open(config_path: PathBuf) -> AppResult<Self> {
        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            EngineConfig::default()
        };
        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<EngineConfig> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate().map_err(AppError::config)?;
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    fn save_to_file(path: &Path, config: &EngineConfig) -> AppResult<()> {
        config.validate().map_err(AppError::config)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get a clone of the current configuration
    pub fn get_config_clone(&self) -> EngineConfig {
        self.config.clone()
    }

    /// Update the configuration with a partial update and persist it.
    /// An update that fails validation leaves the current config untouched.
    pub fn update_config(&mut self, update: EngineConfigUpdate) -> AppResult<EngineConfig> {
        let mut candidate = self.config.clone();
        candidate.apply_update(update);
        Self::save_to_file(&self.config_path, &candidate)?;
        self.config = candidate;
        Ok(self.config.clone())
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> AppResult<()> {
        Self::save_to_file(&self.config_path, &self.config)
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> AppResult<()> {
        self.config = Self::load_from_file(&self.config_path)?;
        Ok(())
    }

    /// Reset configuration to defaults
    pub fn reset(&mut self) -> AppResult<()> {
        self.config = EngineConfig::default();
        self.save()?;
        Ok(())
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(PROJECT_CONFIG_FILE),
            config: EngineConfig::default(),
        }
    }
}
