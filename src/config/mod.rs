use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub modules: ModuleConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Shared-module file name prefix (`lib` on Unix)
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Shared-module file name suffix (`.so`, `.dll`)
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Prefix of the variable that reports which file a command came from
    #[serde(default = "default_report_prefix")]
    pub report_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SearchConfig {
    /// Also search the directories listed in `PATH`, after the given ones
    #[serde(default)]
    pub system_path: bool,

    /// Directories searched after the ones named by the script
    #[serde(default)]
    pub default_dirs: Vec<String>,
}

// Default value functions
fn default_prefix() -> String {
    let prefix = if cfg!(windows) { "" } else { "lib" };
    prefix.to_string()
}

fn default_suffix() -> String {
    let suffix = if cfg!(windows) { ".dll" } else { ".so" };
    suffix.to_string()
}

fn default_report_prefix() -> String {
    "LOADED_COMMAND".to_string()
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            suffix: default_suffix(),
            report_prefix: default_report_prefix(),
        }
    }
}

impl Config {
    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        let config: Config =
            serde_yaml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_yaml::to_string(self).context("Failed to serialize config")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        fs::write(path.as_ref(), contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get default configuration path
    pub fn default_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;

        Ok(home.join(".loadcmd").join("config.yaml"))
    }
}
