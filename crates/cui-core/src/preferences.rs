use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::io::atomic_write;
use crate::paths;

/// User preferences surfaced through `GET/PUT /api/preferences`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub color_scheme: String,
    pub language: String,
    pub notifications_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            color_scheme: "system".into(),
            language: "en".into(),
            notifications_enabled: true,
        }
    }
}

/// Single-document store for [`Preferences`], same read-modify-write shape
/// as the session-info store but with no schema versioning.
pub struct PreferencesStore {
    path: PathBuf,
    inner: Mutex<Preferences>,
}

impl PreferencesStore {
    pub fn open(data_dir: &Path) -> Self {
        let path = paths::preferences_path(data_dir);
        let prefs = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            inner: Mutex::new(prefs),
        }
    }

    pub fn get(&self) -> Preferences {
        self.inner.lock().unwrap().clone()
    }

    pub fn put(&self, prefs: Preferences) -> Result<Preferences> {
        let mut current = self.inner.lock().unwrap();
        let json = serde_json::to_vec_pretty(&prefs)?;
        atomic_write(&self.path, &json)?;
        *current = prefs.clone();
        Ok(prefs)
    }
}
