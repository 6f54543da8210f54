use crate::errors::ScanError;
use crate::models::config::ScannerConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const APP_DIR: &str = "label-scanner";
const CONFIG_FILE: &str = "config.json";

/// Configuration manager for scanner settings
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager over the platform config directory
    ///
    /// This will create the config directory if it doesn't exist.
    pub fn new() -> Result<Self, ScanError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ScanError::Config("failed to determine config directory".to_string()))?
            .join(APP_DIR);

        fs::create_dir_all(&config_dir)?;

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE),
            config_dir,
        })
    }

    /// Manager over an explicit config file
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        let config_path = path.as_ref().to_path_buf();
        let config_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            config_dir,
            config_path,
        }
    }

    /// Save configuration to disk as pretty JSON
    pub fn save(&self, config: &ScannerConfig) -> Result<(), ScanError> {
        config.validate()?;
        fs::create_dir_all(&self.config_dir)?;

        let json = serde_json::to_string_pretty(config)
            .map_err(|e| ScanError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(&self.config_path, json)?;

        info!(path = %self.config_path.display(), "Config saved");
        Ok(())
    }

    /// Load and validate configuration
    ///
    /// If config file doesn't exist, returns default configuration
    pub fn load(&self) -> Result<ScannerConfig, ScanError> {
        if !self.config_exists() {
            debug!(path = %self.config_path.display(), "No config file, using defaults");
            return Ok(ScannerConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)?;
        let config: ScannerConfig = serde_json::from_str(&content).map_err(|e| {
            ScanError::Config(format!("failed to parse {}: {}", self.config_path.display(), e))
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn config_file_path(&self) -> &PathBuf {
        &self.config_path
    }

    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }
}
