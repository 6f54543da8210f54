use crate::errors::ScanError;
use crate::models::config::ScannerConfig;
use crate::services::config::ConfigManager;
use std::path::{Path, PathBuf};
use tracing::info;

fn manager(path: Option<&Path>) -> Result<ConfigManager, ScanError> {
    match path {
        Some(path) => Ok(ConfigManager::with_path(path)),
        None => ConfigManager::new(),
    }
}

/// Load configuration from `path`, or from the platform config directory
pub fn load_config(path: Option<&Path>) -> Result<ScannerConfig, ScanError> {
    manager(path)?.load()
}

/// Save configuration to `path`, or to the platform config directory
pub fn save_config(path: Option<&Path>, config: &ScannerConfig) -> Result<(), ScanError> {
    manager(path)?.save(config)
}

/// Write the default configuration unless a file already exists
///
/// Returns the config file path either way.
pub fn init_config(path: Option<&Path>, overwrite: bool) -> Result<PathBuf, ScanError> {
    let manager = manager(path)?;
    if manager.config_exists() && !overwrite {
        info!(path = %manager.config_file_path().display(), "Config already exists");
        return Ok(manager.config_file_path().clone());
    }

    manager.save(&ScannerConfig::default())?;
    Ok(manager.config_file_path().clone())
}

/// Get config file path
pub fn get_config_path(path: Option<&Path>) -> Result<PathBuf, ScanError> {
    Ok(manager(path)?.config_file_path().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("label-scanner-cmd-{}-{}", std::process::id(), name))
            .join("config.json")
    }

    #[test]
    fn test_init_config_keeps_existing_file() {
        let path = temp_path("init");
        let _ = fs::remove_dir_all(path.parent().unwrap());

        let written = init_config(Some(&path), false).unwrap();
        assert_eq!(written, path);
        assert_eq!(load_config(Some(&path)).unwrap(), ScannerConfig::default());

        let mut custom = ScannerConfig::default();
        custom.scanner.lock_threshold = 0.75;
        save_config(Some(&path), &custom).unwrap();

        init_config(Some(&path), false).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().scanner.lock_threshold, 0.75);

        init_config(Some(&path), true).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), ScannerConfig::default());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_explicit_path_is_reported() {
        let path = temp_path("path");
        assert_eq!(get_config_path(Some(&path)).unwrap(), path);
    }
}
