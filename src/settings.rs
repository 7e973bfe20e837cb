use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSettings {
    #[serde(default)]
    user_name: Option<String>,
}

/// Small JSON key/value file that survives restarts. Holds the last operator
/// name so it can be pre-filled for the next session.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user_name(&self) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .user_name
            .clone()
    }

    pub fn set_user_name(&self, user_name: &str) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.user_name = Some(user_name.to_string());
        self.persist(&guard)
    }

    pub fn clear_user_name(&self) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.user_name = None;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn user_name_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.user_name(), None);
        store.set_user_name("Ada").unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.user_name().as_deref(), Some("Ada"));
    }

    #[test]
    fn clear_removes_durable_copy() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        let store = SettingsStore::new(path.clone()).unwrap();
        store.set_user_name("Ada").unwrap();
        store.clear_user_name().unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.user_name(), None);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.user_name(), None);
    }
}
