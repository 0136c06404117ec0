use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("", "", "cueroom")
            .map(|proj_dirs| proj_dirs.config_dir().join("config.json"))
            .unwrap_or_else(|| PathBuf::from("cueroom_config.json"))
    }

    /// Default location of the local record when running without a remote store.
    pub fn record_path() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            let state_dir = PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("cueroom");
            Some(state_dir.join("room.json"))
        } else {
            ProjectDirs::from("", "", "cueroom")
                .map(|proj_dirs| proj_dirs.data_local_dir().join("room.json"))
        }
    }
}
