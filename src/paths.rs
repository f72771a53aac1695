use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

/// Application paths following OS conventions
#[derive(Clone, Debug)]
pub struct AppPaths {
    /// Configuration directory (config.toml)
    pub config: PathBuf,
    /// Data directory (encrypted templates)
    pub data: PathBuf,
    /// Cache directory (event logs)
    pub cache: PathBuf,
}

impl AppPaths {
    /// Resolve OS-specific paths for Ember Gate
    ///
    /// # Platform Paths
    ///
    /// ## Linux
    /// - Config: `~/.config/EmberGate/`
    /// - Data: `~/.local/share/EmberGate/` → templates/{face,voice}/, templates/.key
    /// - Cache: `~/.cache/EmberGate/` → logs/events.jsonl
    ///
    /// ## macOS
    /// - Config: `~/Library/Preferences/EmberGate/`
    /// - Data: `~/Library/Application Support/EmberGate/`
    /// - Cache: `~/Library/Caches/EmberGate/`
    ///
    /// ## Windows
    /// - Config: `%APPDATA%\EmberGate\config\`
    /// - Data: `%LOCALAPPDATA%\EmberGate\`
    /// - Cache: `%LOCALAPPDATA%\EmberGate\Cache\`
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "LotusEmberLabs", "EmberGate")
            .context("Failed to determine project directories")?;

        Ok(Self {
            config: proj_dirs.config_dir().to_path_buf(),
            data: proj_dirs.data_dir().to_path_buf(),
            cache: proj_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Create all necessary directories
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.config).context("Failed to create config directory")?;
        fs::create_dir_all(self.templates_dir())
            .context("Failed to create templates directory")?;
        fs::create_dir_all(self.logs_dir()).context("Failed to create logs directory")?;

        log::info!("Application directories initialized");
        log::debug!("  Config: {}", self.config.display());
        log::debug!("  Data:   {}", self.data.display());
        log::debug!("  Cache:  {}", self.cache.display());

        Ok(())
    }

    /// Get path to config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Get path to the encrypted template store
    pub fn templates_dir(&self) -> PathBuf {
        self.data.join("templates")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.cache.join("logs")
    }

    /// Get path to the JSON-lines audit log
    pub fn events_log(&self) -> PathBuf {
        self.logs_dir().join("events.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_creation() {
        let paths = AppPaths::new().expect("Failed to create paths");

        // Verify paths are not empty
        assert!(!paths.config.as_os_str().is_empty());
        assert!(!paths.data.as_os_str().is_empty());
        assert!(paths.templates_dir().starts_with(&paths.data));
        assert!(paths.events_log().ends_with("events.jsonl"));
    }
}
