//! Configuration file support for vaxsched.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/vaxsched/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub booking: BookingConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Credential policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// Key-stretching rounds for newly registered credentials
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_password_length: default_min_password_length(),
            hash_iterations: default_hash_iterations(),
        }
    }
}

/// Booking transaction parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Extra attempts when a reservation ID is already taken
    #[serde(default = "default_max_id_retries")]
    pub max_id_retries: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            max_id_retries: default_max_id_retries(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("vaxsched")
}

fn default_min_password_length() -> usize {
    8
}

fn default_hash_iterations() -> u32 {
    10_000
}

fn default_max_id_retries() -> u32 {
    3
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("vaxsched").join("config.toml")
    }

    /// Reject values that would make credentials or bookings unusable
    pub fn validate(&self) -> Result<()> {
        if self.security.hash_iterations == 0 {
            return Err(Error::Config("security.hash_iterations must be at least 1".into()));
        }
        if self.security.min_password_length == 0 {
            return Err(Error::Config(
                "security.min_password_length must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
