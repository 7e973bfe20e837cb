use std::{env, path::PathBuf};

const DEFAULT_DATA_DIR: &str = "scanlab-data";

/// Process configuration, read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub export_dir: PathBuf,
    pub debug: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = lookup("SCANLAB_DATA_DIR")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let export_dir = lookup("SCANLAB_EXPORT_DIR")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("exports"));
        let debug = lookup("SCANLAB_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            data_dir,
            export_dir,
            debug,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("scanlab.sqlite3")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }
}
