pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "CIRRUS_CONFIG_PATH";

const CANDIDATES: [&str; 4] = [
    "cirrus.local.yaml",
    ".cirrus.local.yaml",
    "cirrus.yaml",
    ".cirrus.yaml",
];

/// Returns the user-level configuration directory, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("cirrus");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the settings file
///
/// Search order:
/// 1. `CIRRUS_CONFIG_PATH`
/// 2. current directory: cirrus.local.yaml, .cirrus.local.yaml, cirrus.yaml, .cirrus.yaml
/// 3. the same names inside `./.cirrus/`
/// 4. `~/.config/cirrus/cirrus.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".cirrus");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("cirrus").join("cirrus.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Runtime settings of the `cirrus` tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where `state.json` and its lock live
    pub state_dir: PathBuf,

    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,

    pub convergence: ConvergenceSettings,

    pub caller: CallerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".cirrus"),
            log_filter: "info".to_string(),
            convergence: ConvergenceSettings::default(),
            caller: CallerSettings::default(),
        }
    }
}

/// How long a destroy waits for member VMs to be expunged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceSettings {
    pub max_attempts: u32,
    pub interval_secs: u64,
}

impl ConvergenceSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval_secs: 10,
        }
    }
}

/// Identity operations run as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallerSettings {
    pub user_id: u64,
    pub account_id: u64,
    pub admin: bool,
}

impl Default for CallerSettings {
    fn default() -> Self {
        Self {
            user_id: 1,
            account_id: 1,
            admin: true,
        }
    }
}

impl Settings {
    /// Load the discovered settings file, or defaults when there is none
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Ok(path) => Self::from_file(&path),
            Err(ConfigError::ConfigFileNotFound) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    fn parse(content: &str, origin: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }
}

impl std::str::FromStr for Settings {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, "<inline>")
    }
}
