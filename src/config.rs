use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::error::PersistenceError;
use crate::store::{BackgroundStore, FileRecordStore, JsonBinStore, RecordStore};

pub const DEFAULT_STORE_URL: &str = "https://api.jsonbin.io/v3/b";
pub const DEFAULT_DATE_FORMAT: &str = "%d/%m/%Y";

/// Where the room record lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    Remote {
        base_url: String,
        bin_id: String,
        access_key: String,
    },
    File {
        path: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Remote {
            base_url: DEFAULT_STORE_URL.to_string(),
            bin_id: String::new(),
            access_key: String::new(),
        }
    }
}

impl StoreConfig {
    /// Build the configured store. Remote writes go through a background
    /// writer so the caller never blocks on the network.
    pub fn open(&self) -> Result<Box<dyn RecordStore>, PersistenceError> {
        match self {
            StoreConfig::Remote {
                base_url,
                bin_id,
                access_key,
            } => {
                let remote = JsonBinStore::new(base_url, bin_id, access_key)?;
                Ok(Box::new(BackgroundStore::new(remote)))
            }
            StoreConfig::File { path } => Ok(Box::new(FileRecordStore::with_path(path))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    /// strftime pattern stamped on submitted results.
    pub date_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            path: AppDirs::config_path(),
        }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            match serde_json::from_slice::<Config>(&bytes) {
                Ok(cfg) => return cfg,
                Err(err) => log::warn!("ignoring unreadable config {}: {}", self.path.display(), err),
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}
