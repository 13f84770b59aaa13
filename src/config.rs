use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::AppError;

pub const APP_DIR_NAME: &str = "mediashelf";
pub const DATABASE_FILE_NAME: &str = "mediashelf.db";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300; // 5 minutes for large files

pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn get_config_file_path() -> PathBuf {
    get_config_dir().join(CONFIG_FILE_NAME)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| default_data_dir().join("transient"))
        .join(APP_DIR_NAME)
}

/// When the foreground player gives up its engine.
///
/// Platforms that can show the player next to other windows keep the engine
/// alive while paused and release it on stop; the others release on pause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    #[default]
    OnStop,
    OnPause,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Holds the database file.
    pub data_dir: PathBuf,
    /// App-private storage for reconciled downloads.
    pub private_dir: PathBuf,
    /// Where the download manager writes in-flight payloads.
    pub download_dir: PathBuf,
    pub worker_threads: usize,
    pub download_timeout_secs: u64,
    pub release_policy: ReleasePolicy,
    pub media_controls: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            private_dir: data_dir.join("files"),
            download_dir: default_download_dir(),
            data_dir,
            worker_threads: DEFAULT_WORKER_THREADS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            release_policy: ReleasePolicy::default(),
            media_controls: true,
        }
    }
}

impl AppConfig {
    /// Config rooted in a single directory. Used by tests and portable installs.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.to_path_buf(),
            private_dir: root.join("files"),
            download_dir: root.join("downloads"),
            media_controls: false,
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }

    /// Reads the config file, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid config {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load() -> Result<Self, AppError> {
        Self::load_from(&get_config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.worker_threads == 0 {
            return Err(AppError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.download_timeout_secs == 0 {
            return Err(AppError::Config(
                "download_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
